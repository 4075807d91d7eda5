//! ClinicalTrials.gov Client (primary registry)
//!
//! Fetches the registry record for an NCT ID from the ClinicalTrials.gov
//! API v2. When the ID lookup returns nothing, falls back to a title search.
//! The ladder stops at the title stage: `query.titles` is a title field and
//! author names or years appended to it only add noise.
//!
//! # API Reference
//! - Endpoint: https://clinicaltrials.gov/api/v2/studies/{nctId}
//! - Search: https://clinicaltrials.gov/api/v2/studies?query.titles=...
//! - Documentation: https://clinicaltrials.gov/data-api/api

use super::http::{RetryPolicy, SourceHttp};
use super::ladder::{run_ladder, NarrowingStage, SearchPage, PLAIN_SYNTAX};
use super::ClientSettings;
use crate::types::{SourceClient, SourceError, SourceKind, SourcePayload, TrialQuery};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use trialscope_common::config::SourceConfig;
use trialscope_common::Result;

/// Registered source name
pub const SOURCE_NAME: &str = "clinical_trials";

const DEFAULT_BASE_URL: &str = "https://clinicaltrials.gov/api/v2";

/// Title searches retrieve at most this many studies
const MAX_PAGE_SIZE: usize = 100;

/// ClinicalTrials.gov Client
pub struct ClinicalTrialsClient {
    http: SourceHttp,
    settings: ClientSettings,
}

impl ClinicalTrialsClient {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let settings = ClientSettings::resolve(config, DEFAULT_BASE_URL, 20, 30);
        let http = SourceHttp::new(
            SOURCE_NAME,
            settings.request_timeout,
            RetryPolicy::from_config(config),
            None,
        )?;
        Ok(Self { http, settings })
    }

    /// Fetch one study by NCT ID; 404 means zero hits
    async fn fetch_study(&self, nct_id: &str) -> std::result::Result<SearchPage<Vec<Study>>, SourceError> {
        let url = format!("{}/studies/{}", self.settings.base_url, nct_id);
        match self.http.get_json(&url, &[("format", "json".to_string())]).await {
            Ok(value) => {
                let study: Study = serde_json::from_value(value)
                    .map_err(|e| SourceError::Parse(format!("study {}: {}", nct_id, e)))?;
                Ok(SearchPage {
                    total: 1,
                    items: vec![study],
                })
            }
            Err(SourceError::Api { status: 404, .. }) => Ok(SearchPage {
                total: 0,
                items: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Full-text search over study titles
    async fn search_studies(&self, term: &str) -> std::result::Result<SearchPage<Vec<Study>>, SourceError> {
        let url = format!("{}/studies", self.settings.base_url);
        let params = [
            ("format", "json".to_string()),
            ("query.titles", term.to_string()),
            ("pageSize", self.settings.max_hits.min(MAX_PAGE_SIZE).to_string()),
            ("countTotal", "true".to_string()),
        ];
        let value = self.http.get_json(&url, &params).await?;
        let page: StudyPage = serde_json::from_value(value)
            .map_err(|e| SourceError::Parse(format!("study search: {}", e)))?;
        Ok(SearchPage {
            total: page.total_count.unwrap_or(page.studies.len()),
            items: page.studies,
        })
    }
}

#[async_trait]
impl SourceClient for ClinicalTrialsClient {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Registry
    }

    fn timeout(&self) -> Duration {
        self.settings.unit_timeout
    }

    async fn search(&self, query: &TrialQuery) -> std::result::Result<SourcePayload, SourceError> {
        // Any non-empty page is accepted, so the ladder ends at the title stage
        let outcome = run_ladder(
            query,
            &PLAIN_SYNTAX,
            usize::MAX,
            |stage, term| async move {
                match stage {
                    NarrowingStage::ById => self.fetch_study(&term).await,
                    _ => self.search_studies(&term).await,
                }
            },
        )
        .await?;

        let Some(outcome) = outcome else {
            return Err(SourceError::NotFound(format!(
                "no registry record for {}",
                query.trial_id
            )));
        };

        // Prefer the exact NCT ID among title hits, else the first hit
        let study = outcome
            .page
            .items
            .iter()
            .find(|s| s.nct_id().eq_ignore_ascii_case(&query.trial_id))
            .or_else(|| outcome.page.items.first())
            .ok_or_else(|| SourceError::Parse("study page reported hits but had none".into()))?;

        let mut data = study_to_fields(study);
        data.insert("search_stage".into(), json!(outcome.stage.as_str()));

        debug!(
            trial_id = %query.trial_id,
            stage = outcome.stage.as_str(),
            status = ?study.overall_status(),
            "ClinicalTrials.gov record retrieved"
        );

        let over_broad = outcome.page.total > self.settings.max_hits;
        Ok(SourcePayload::new(data, outcome.page.total).over_broad(over_broad))
    }
}

/// Normalize a registry study into canonical record fields
pub fn study_to_fields(study: &Study) -> Map<String, Value> {
    let p = &study.protocol_section;
    let mut data = Map::new();

    let mut put = |key: &str, value: Value| {
        data.insert(key.to_string(), value);
    };

    put("nct_id", json!(p.identification_module.nct_id));
    put("title", json!(p.identification_module.brief_title));
    put("official_title", json!(p.identification_module.official_title));
    put("overall_status", json!(p.status_module.overall_status));
    put("why_stopped", json!(p.status_module.why_stopped));
    put(
        "start_date",
        json!(p.status_module.start_date_struct.as_ref().map(|d| &d.date)),
    );
    put(
        "completion_date",
        json!(p.status_module.completion_date_struct.as_ref().map(|d| &d.date)),
    );
    put("brief_summary", json!(p.description_module.brief_summary));
    put("conditions", json!(p.conditions_module.conditions));
    put("keywords", json!(p.conditions_module.keywords));
    put("phases", json!(p.design_module.phases));
    put("study_type", json!(p.design_module.study_type));
    put(
        "enrollment",
        json!(p.design_module.enrollment_info.as_ref().and_then(|e| e.count)),
    );

    let interventions = &p.arms_interventions_module.interventions;
    put(
        "interventions",
        json!(interventions.iter().map(|i| &i.name).collect::<Vec<_>>()),
    );
    put(
        "intervention_types",
        json!(interventions
            .iter()
            .filter_map(|i| i.intervention_type.as_ref())
            .collect::<Vec<_>>()),
    );

    let descriptions: Vec<&String> = interventions
        .iter()
        .filter_map(|i| i.description.as_ref())
        .chain(
            p.arms_interventions_module
                .arm_groups
                .iter()
                .filter_map(|a| a.description.as_ref()),
        )
        .collect();
    put("intervention_descriptions", json!(descriptions));

    put(
        "lead_sponsor",
        json!(p.sponsor_collaborators_module.lead_sponsor.as_ref().map(|s| &s.name)),
    );
    put("has_results", json!(study.has_results));

    data
}

// ============================================================================
// ClinicalTrials.gov API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudyPage {
    #[serde(default)]
    studies: Vec<Study>,
    total_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    #[serde(default)]
    protocol_section: ProtocolSection,
    #[serde(default)]
    has_results: bool,
}

impl Study {
    pub fn nct_id(&self) -> &str {
        &self.protocol_section.identification_module.nct_id
    }

    pub fn overall_status(&self) -> Option<&str> {
        self.protocol_section.status_module.overall_status.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProtocolSection {
    identification_module: IdentificationModule,
    status_module: StatusModule,
    description_module: DescriptionModule,
    conditions_module: ConditionsModule,
    design_module: DesignModule,
    arms_interventions_module: ArmsInterventionsModule,
    sponsor_collaborators_module: SponsorCollaboratorsModule,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdentificationModule {
    nct_id: String,
    brief_title: Option<String>,
    official_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusModule {
    overall_status: Option<String>,
    why_stopped: Option<String>,
    start_date_struct: Option<DateStruct>,
    completion_date_struct: Option<DateStruct>,
}

#[derive(Debug, Deserialize)]
struct DateStruct {
    date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescriptionModule {
    brief_summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConditionsModule {
    conditions: Vec<String>,
    keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DesignModule {
    study_type: Option<String>,
    phases: Vec<String>,
    enrollment_info: Option<EnrollmentInfo>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentInfo {
    count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ArmsInterventionsModule {
    interventions: Vec<Intervention>,
    arm_groups: Vec<ArmGroup>,
}

#[derive(Debug, Deserialize)]
struct Intervention {
    #[serde(rename = "type")]
    intervention_type: Option<String>,
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmGroup {
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SponsorCollaboratorsModule {
    lead_sponsor: Option<LeadSponsor>,
}

#[derive(Debug, Deserialize)]
struct LeadSponsor {
    name: String,
}
