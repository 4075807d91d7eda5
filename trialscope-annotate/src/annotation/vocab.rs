//! Controlled vocabularies
//!
//! Each annotation field takes its value from a fixed set with one explicit
//! sentinel member. Members serialize as their canonical label.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed value set of one annotation field
pub trait Vocabulary: Sized + Copy + PartialEq + fmt::Debug + 'static {
    /// Annotation field name used in warnings
    const FIELD: &'static str;

    /// Every member, sentinel included
    fn members() -> &'static [Self];

    /// Member used when no rule accepts the raw value
    fn sentinel() -> Self;

    /// Canonical label
    fn label(&self) -> &'static str;

    /// Additional spellings, matched after compaction
    fn aliases() -> &'static [(&'static str, Self)] {
        &[]
    }

    /// Labels of all members, for warnings and prompts
    fn allowed() -> Vec<&'static str> {
        Self::members().iter().map(|m| m.label()).collect()
    }
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal, sentinel = $sentinel:ident,
        { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl Vocabulary for $name {
            const FIELD: &'static str = $field;

            fn members() -> &'static [Self] {
                Self::ALL
            }

            fn sentinel() -> Self {
                $name::$sentinel
            }

            fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            fn aliases() -> &'static [(&'static str, Self)] {
                <$name>::ALIASES
            }
        }
    };
}

vocabulary! {
    /// Registry recruitment status
    StudyStatus, field = "study_status", sentinel = Unknown, {
        NotYetRecruiting => "NOT_YET_RECRUITING",
        Recruiting => "RECRUITING",
        EnrollingByInvitation => "ENROLLING_BY_INVITATION",
        ActiveNotRecruiting => "ACTIVE_NOT_RECRUITING",
        Suspended => "SUSPENDED",
        Terminated => "TERMINATED",
        Completed => "COMPLETED",
        Withdrawn => "WITHDRAWN",
        Available => "AVAILABLE",
        NoLongerAvailable => "NO_LONGER_AVAILABLE",
        TemporarilyNotAvailable => "TEMPORARILY_NOT_AVAILABLE",
        ApprovedForMarketing => "APPROVED_FOR_MARKETING",
        Withheld => "WITHHELD",
        Unknown => "UNKNOWN",
    }
}

impl StudyStatus {
    const ALIASES: &'static [(&'static str, StudyStatus)] = &[
        ("FINISHED", StudyStatus::Completed),
        ("STOPPED", StudyStatus::Terminated),
        ("ONGOING", StudyStatus::ActiveNotRecruiting),
        ("UNKNOWN STATUS", StudyStatus::Unknown),
    ];
}

vocabulary! {
    /// Trial phase; a trial may carry several
    Phase, field = "phases", sentinel = Unknown, {
        EarlyPhase1 => "EARLY_PHASE1",
        Phase1 => "PHASE1",
        Phase2 => "PHASE2",
        Phase3 => "PHASE3",
        Phase4 => "PHASE4",
        Na => "NA",
        Unknown => "UNKNOWN",
    }
}

impl Phase {
    const ALIASES: &'static [(&'static str, Phase)] = &[
        ("PHASE 0", Phase::EarlyPhase1),
        ("EARLY PHASE I", Phase::EarlyPhase1),
        ("N/A", Phase::Na),
        ("NOT APPLICABLE", Phase::Na),
    ];
}

vocabulary! {
    /// Antimicrobial-peptide classification
    Classification, field = "classification", sentinel = Unknown, {
        AmpInfection => "AMP(infection)",
        AmpOther => "AMP(other)",
        Other => "Other",
        Unknown => "Unknown",
    }
}

impl Classification {
    const ALIASES: &'static [(&'static str, Classification)] = &[
        ("ANTIMICROBIAL PEPTIDE (INFECTION)", Classification::AmpInfection),
        ("ANTIMICROBIAL PEPTIDE (OTHER)", Classification::AmpOther),
        ("NON-AMP", Classification::Other),
    ];
}

vocabulary! {
    /// Route of administration
    DeliveryMode, field = "delivery_mode", sentinel = Unknown, {
        InjectionInfusion => "Injection/Infusion",
        Topical => "Topical",
        Oral => "Oral",
        Other => "Other",
        Unknown => "Unknown",
    }
}

impl DeliveryMode {
    const ALIASES: &'static [(&'static str, DeliveryMode)] = &[
        ("INJECTION", DeliveryMode::InjectionInfusion),
        ("INFUSION", DeliveryMode::InjectionInfusion),
        ("INTRAVENOUS", DeliveryMode::InjectionInfusion),
        ("IV", DeliveryMode::InjectionInfusion),
        ("SUBCUTANEOUS", DeliveryMode::InjectionInfusion),
        ("INTRAMUSCULAR", DeliveryMode::InjectionInfusion),
        ("CUTANEOUS", DeliveryMode::Topical),
        ("DERMAL", DeliveryMode::Topical),
        ("BY MOUTH", DeliveryMode::Oral),
        ("PO", DeliveryMode::Oral),
    ];
}

vocabulary! {
    /// Trial outcome
    Outcome, field = "outcome", sentinel = Unknown, {
        Positive => "Positive",
        Withdrawn => "Withdrawn",
        Terminated => "Terminated",
        FailedCompleted => "Failed - completed trial",
        Recruiting => "Recruiting",
        ActiveNotRecruiting => "Active, not recruiting",
        Unknown => "Unknown",
    }
}

impl Outcome {
    const ALIASES: &'static [(&'static str, Outcome)] = &[
        ("SUCCESSFUL", Outcome::Positive),
        ("SUCCESS", Outcome::Positive),
        ("FAILED", Outcome::FailedCompleted),
        ("FAILED COMPLETED", Outcome::FailedCompleted),
    ];

    /// Outcomes for which a failure reason is meaningful
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Terminated | Outcome::Withdrawn | Outcome::FailedCompleted
        )
    }
}

vocabulary! {
    /// Why a trial failed or stopped
    FailureReason, field = "failure_reason", sentinel = NotApplicable, {
        Business => "Business reasons",
        Ineffective => "Ineffective for purpose",
        Toxic => "Toxic/Unsafe",
        Covid => "Due to covid",
        Recruitment => "Recruitment issues",
        NotApplicable => "N/A",
    }
}

impl FailureReason {
    const ALIASES: &'static [(&'static str, FailureReason)] = &[
        ("BUSINESS", FailureReason::Business),
        ("FUNDING", FailureReason::Business),
        ("INEFFECTIVE", FailureReason::Ineffective),
        ("LACK OF EFFICACY", FailureReason::Ineffective),
        ("TOXIC", FailureReason::Toxic),
        ("UNSAFE", FailureReason::Toxic),
        ("SAFETY", FailureReason::Toxic),
        ("COVID", FailureReason::Covid),
        ("COVID-19", FailureReason::Covid),
        ("RECRUITMENT", FailureReason::Recruitment),
        ("LOW ENROLLMENT", FailureReason::Recruitment),
        ("POOR ENROLLMENT", FailureReason::Recruitment),
        ("NA", FailureReason::NotApplicable),
        ("NONE", FailureReason::NotApplicable),
        ("NOT APPLICABLE", FailureReason::NotApplicable),
    ];
}
