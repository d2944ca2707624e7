//! Cross-channel state synchronization.
//!
//! An applicant can start on the web and continue over WhatsApp, or the other
//! way round. The engine merges the two records into one view of the
//! application, writes it back to both, and handles the platform-switch flows
//! that create the counterpart session in the first place.
//!
//! Merge rules: the union of both records' form data survives, a conflicting
//! field goes to the side that wrote it more recently (per-field timestamps
//! when present, whole-record `updated_at` otherwise), an empty value never
//! overwrites a filled one, and the merged step is whichever record is
//! further along the wizard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::catalog::{CatalogKind, CatalogLookup};
use super::codes::{CodeError, ReferenceCodeService};
use super::domain::{
    new_session_id, value_is_filled, ApplicationState, Channel, FormData, NewState,
    SessionLifetimes, StatePatch, Step, META_CREATED_FROM_WEB, META_CREATED_FROM_WHATSAPP,
    META_FIELD_UPDATED_AT, META_LAST_SYNC, META_MERGED_FROM, META_PHONE_NUMBER,
    META_PLATFORM_SWITCH_TIME, META_SYNC_SOURCE,
};
use super::steps::position;
use super::store::{StateStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no application states found for synchronization")]
    NoStatesFound,
    #[error("web session not found: {0}")]
    WebSessionNotFound(String),
    #[error("whatsapp session not found: {0}")]
    WhatsappSessionNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Code(#[from] CodeError),
}

/// Result of merging a session pair.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub current_step: Step,
    /// Updated records, behind-side first (the write order).
    pub states: Vec<ApplicationState>,
    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhatsappSwitch {
    pub whatsapp_session_id: String,
    pub current_step: Step,
    pub reference_code: String,
    /// False when an existing whatsapp session was merged instead.
    pub created: bool,
    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebSwitch {
    pub web_session_id: String,
    pub current_step: Step,
    pub created: bool,
    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inconsistency {
    pub field: String,
    pub left: Value,
    pub right: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusKind {
    Synchronized,
    Diverged,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub status: SyncStatusKind,
    pub inconsistencies: Vec<Inconsistency>,
    pub last_sync: Option<DateTime<Utc>>,
    pub left_updated: DateTime<Utc>,
    pub right_updated: DateTime<Utc>,
}

/// Fields whose divergence between channels is worth reporting.
pub const CONSISTENCY_FIELDS: [&str; 8] = [
    "language",
    "intent",
    "employer",
    "hasAccount",
    "selectedCategory",
    "selectedBusiness",
    "selectedScale",
    "formResponses",
];

pub struct SyncEngine<S, C> {
    store: Arc<S>,
    catalog: Arc<C>,
    codes: Arc<ReferenceCodeService<S>>,
    lifetimes: SessionLifetimes,
}

impl<S: StateStore, C: CatalogLookup> SyncEngine<S, C> {
    pub fn new(
        store: Arc<S>,
        catalog: Arc<C>,
        codes: Arc<ReferenceCodeService<S>>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        Self {
            store,
            catalog,
            codes,
            lifetimes,
        }
    }

    /// Merge two session records and write the result back to both.
    ///
    /// The behind record is written first so an interruption leaves the
    /// further-along record authoritative. When only one session resolves the
    /// call is a no-op returning that record untouched.
    pub fn synchronize(
        &self,
        primary_session_id: &str,
        secondary_session_id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let primary = self.store.get(primary_session_id)?;
        let secondary = self.store.get(secondary_session_id)?;
        let now = Utc::now();

        let (ahead, behind) = match (primary, secondary) {
            (None, None) => return Err(SyncError::NoStatesFound),
            (Some(only), None) | (None, Some(only)) => {
                tracing::warn!(
                    session_id = only.session_id,
                    "synchronization requested with a single live session"
                );
                return Ok(SyncOutcome {
                    current_step: only.current_step,
                    states: vec![only],
                    sync_timestamp: now,
                });
            }
            (Some(first), Some(second)) => order_by_progress(first, second),
        };

        let merged_step = ahead.current_step;
        let merged_data = merge_form_data(&behind, &ahead);
        let merged_stamps = merge_field_stamps(&behind, &ahead);
        let base_metadata = merged_metadata(&behind, &ahead, merged_stamps, now);

        let behind_updated = self.store.update(
            &behind.session_id,
            behind.version,
            sync_patch(merged_step, &merged_data, &base_metadata, behind.channel),
        )?;
        let ahead_updated = self.store.update(
            &ahead.session_id,
            ahead.version,
            sync_patch(merged_step, &merged_data, &base_metadata, ahead.channel),
        )?;

        tracing::info!(
            ahead = ahead_updated.session_id,
            behind = behind_updated.session_id,
            step = %merged_step,
            merged_fields = merged_data.len(),
            "cross-channel synchronization completed"
        );
        Ok(SyncOutcome {
            current_step: merged_step,
            states: vec![behind_updated, ahead_updated],
            sync_timestamp: now,
        })
    }

    /// Move a web applicant onto WhatsApp.
    ///
    /// The whatsapp session is keyed by the digits of the phone number; an
    /// existing one is merged with the web session, otherwise a fresh record
    /// is seeded from the web state. Either way the web session ends up with
    /// a reference code the applicant can quote from the new channel.
    pub fn switch_to_whatsapp(
        &self,
        web_session_id: &str,
        phone_number: &str,
    ) -> Result<WhatsappSwitch, SyncError> {
        let web = self
            .store
            .get(web_session_id)?
            .ok_or_else(|| SyncError::WebSessionNotFound(web_session_id.to_string()))?;
        let digits: String = phone_number
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let whatsapp_session_id = format!("whatsapp_{digits}");

        let (current_step, created, sync_timestamp) = if self
            .store
            .get(&whatsapp_session_id)?
            .is_some()
        {
            let outcome = self.synchronize(web_session_id, &whatsapp_session_id)?;
            // A resumed switch still leaves a provenance trail on the
            // whatsapp record.
            self.stamp_switch(
                &whatsapp_session_id,
                META_CREATED_FROM_WEB,
                &web.session_id,
                outcome.sync_timestamp,
            )?;
            (outcome.current_step, false, outcome.sync_timestamp)
        } else {
            let now = Utc::now();
            let mut metadata = web.metadata.clone();
            metadata.insert(META_CREATED_FROM_WEB.to_string(), json!(web.session_id));
            metadata.insert(META_PLATFORM_SWITCH_TIME.to_string(), json!(now.to_rfc3339()));
            metadata.insert(META_PHONE_NUMBER.to_string(), json!(digits));
            let created_state = self.store.create(NewState {
                session_id: whatsapp_session_id.clone(),
                channel: Channel::Whatsapp,
                user_identifier: digits.clone(),
                current_step: web.current_step,
                form_data: self.normalize_data_for_platform(&web.form_data, Channel::Whatsapp),
                metadata,
                expires_at: self.lifetimes.expiry_for(Channel::Whatsapp, now),
                reference_code: web.reference_code.clone(),
                reference_code_expires_at: web.reference_code_expires_at,
            })?;
            (created_state.current_step, true, now)
        };

        let reference_code = self.codes.generate(web_session_id)?;
        tracing::info!(
            web_session = web_session_id,
            whatsapp_session = whatsapp_session_id,
            reference_code,
            step = %current_step,
            "platform switch to whatsapp completed"
        );
        Ok(WhatsappSwitch {
            whatsapp_session_id,
            current_step,
            reference_code,
            created,
            sync_timestamp,
        })
    }

    /// Move a WhatsApp applicant onto the web, minting a web session id when
    /// the caller does not supply one.
    pub fn switch_to_web(
        &self,
        whatsapp_session_id: &str,
        web_session_id: Option<&str>,
    ) -> Result<WebSwitch, SyncError> {
        let whatsapp = self.store.get(whatsapp_session_id)?.ok_or_else(|| {
            SyncError::WhatsappSessionNotFound(whatsapp_session_id.to_string())
        })?;
        let web_session_id = web_session_id
            .map(str::to_string)
            .unwrap_or_else(|| new_session_id(Channel::Web));

        let (current_step, created, sync_timestamp) = if self
            .store
            .get(&web_session_id)?
            .is_some()
        {
            let outcome = self.synchronize(whatsapp_session_id, &web_session_id)?;
            self.stamp_switch(
                &web_session_id,
                META_CREATED_FROM_WHATSAPP,
                &whatsapp.session_id,
                outcome.sync_timestamp,
            )?;
            (outcome.current_step, false, outcome.sync_timestamp)
        } else {
            let now = Utc::now();
            let mut metadata = whatsapp.metadata.clone();
            metadata.insert(
                META_CREATED_FROM_WHATSAPP.to_string(),
                json!(whatsapp.session_id),
            );
            metadata.insert(META_PLATFORM_SWITCH_TIME.to_string(), json!(now.to_rfc3339()));
            let created_state = self.store.create(NewState {
                session_id: web_session_id.clone(),
                channel: Channel::Web,
                // Web sessions identify the user by their session id.
                user_identifier: web_session_id.clone(),
                current_step: whatsapp.current_step,
                form_data: self.normalize_data_for_platform(&whatsapp.form_data, Channel::Web),
                metadata,
                expires_at: self.lifetimes.expiry_for(Channel::Web, now),
                reference_code: whatsapp.reference_code.clone(),
                reference_code_expires_at: whatsapp.reference_code_expires_at,
            })?;
            (created_state.current_step, true, now)
        };

        tracing::info!(
            whatsapp_session = whatsapp_session_id,
            web_session = web_session_id,
            step = %current_step,
            "platform switch to web completed"
        );
        Ok(WebSwitch {
            web_session_id,
            current_step,
            created,
            sync_timestamp,
        })
    }

    /// Record where a merged counterpart session came from and when the
    /// switch happened.
    fn stamp_switch(
        &self,
        session_id: &str,
        origin_key: &str,
        origin_session_id: &str,
        switched_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let state = self
            .store
            .get(session_id)?
            .ok_or(SyncError::NoStatesFound)?;
        let mut metadata = FormData::new();
        metadata.insert(origin_key.to_string(), json!(origin_session_id));
        metadata.insert(
            META_PLATFORM_SWITCH_TIME.to_string(),
            json!(switched_at.to_rfc3339()),
        );
        self.store.update(
            session_id,
            state.version,
            StatePatch {
                metadata: Some(metadata),
                ..StatePatch::default()
            },
        )?;
        Ok(())
    }

    /// Reshape form data for a target channel without losing anything.
    ///
    /// Toward web, the rich `{id, name}` selection objects gain flat id
    /// fields; toward whatsapp, missing selection objects are rebuilt from
    /// the flat ids via the catalog. Unknown keys pass through untouched.
    pub fn normalize_data_for_platform(&self, data: &FormData, target: Channel) -> FormData {
        let mut normalized = data.clone();
        match target {
            Channel::Web => {
                for (object_key, flat_key) in [
                    ("selectedCategory", "category"),
                    ("selectedBusiness", "business"),
                    ("selectedScale", "scale"),
                ] {
                    if let Some(id) = data
                        .get(object_key)
                        .and_then(Value::as_object)
                        .and_then(|object| object.get("id"))
                    {
                        normalized.insert(flat_key.to_string(), id.clone());
                    }
                }
            }
            Channel::Whatsapp => {
                for (flat_key, object_key, kind) in [
                    ("category", "selectedCategory", CatalogKind::Category),
                    ("business", "selectedBusiness", CatalogKind::Business),
                    ("scale", "selectedScale", CatalogKind::Scale),
                ] {
                    if normalized.contains_key(object_key) {
                        continue;
                    }
                    if let Some(id) = data.get(flat_key).and_then(Value::as_str) {
                        let name = self
                            .catalog
                            .display_name(kind, id)
                            .unwrap_or_else(|| format!("{} {id}", kind.label()));
                        normalized
                            .insert(object_key.to_string(), json!({"id": id, "name": name}));
                    }
                }
            }
            Channel::Admin => {}
        }
        normalized
    }

    /// Report divergence between two live sessions without writing anything.
    pub fn get_sync_status(
        &self,
        left_session_id: &str,
        right_session_id: &str,
    ) -> Result<SyncStatus, SyncError> {
        let left = self
            .store
            .get(left_session_id)?
            .ok_or(SyncError::NoStatesFound)?;
        let right = self
            .store
            .get(right_session_id)?
            .ok_or(SyncError::NoStatesFound)?;

        let inconsistencies = validate_data_consistency(&left, &right);
        let status = if inconsistencies.is_empty() {
            SyncStatusKind::Synchronized
        } else {
            SyncStatusKind::Diverged
        };
        Ok(SyncStatus {
            status,
            inconsistencies,
            last_sync: latest_sync_time(&left, &right),
            left_updated: left.updated_at,
            right_updated: right.updated_at,
        })
    }
}

/// Compare the critical fields of two records. A field is reported only when
/// both sides hold a filled value and the values differ; one side still being
/// empty is normal mid-flow, not divergence.
pub fn validate_data_consistency(
    left: &ApplicationState,
    right: &ApplicationState,
) -> Vec<Inconsistency> {
    CONSISTENCY_FIELDS
        .iter()
        .filter_map(|field| {
            let left_value = left.form_data.get(*field)?;
            let right_value = right.form_data.get(*field)?;
            if !value_is_filled(left_value) || !value_is_filled(right_value) {
                return None;
            }
            if left_value == right_value {
                return None;
            }
            Some(Inconsistency {
                field: (*field).to_string(),
                left: left_value.clone(),
                right: right_value.clone(),
            })
        })
        .collect()
}

/// Order a pair as (ahead, behind) by wizard progress, breaking ties on
/// recency.
fn order_by_progress(
    first: ApplicationState,
    second: ApplicationState,
) -> (ApplicationState, ApplicationState) {
    let first_rank = (position(first.current_step), first.updated_at);
    let second_rank = (position(second.current_step), second.updated_at);
    if first_rank >= second_rank {
        (first, second)
    } else {
        (second, first)
    }
}

fn field_stamp(state: &ApplicationState, key: &str) -> Option<DateTime<Utc>> {
    state
        .metadata
        .get(META_FIELD_UPDATED_AT)
        .and_then(Value::as_object)
        .and_then(|stamps| stamps.get(key))
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn write_time(state: &ApplicationState, key: &str) -> DateTime<Utc> {
    field_stamp(state, key).unwrap_or(state.updated_at)
}

/// Union of both records' form data. Conflicts go to the newer writer, and
/// an empty value never displaces a filled one.
fn merge_form_data(behind: &ApplicationState, ahead: &ApplicationState) -> FormData {
    let mut merged = behind.form_data.clone();
    for (key, ahead_value) in &ahead.form_data {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), ahead_value.clone());
            }
            Some(behind_value) => {
                if behind_value == ahead_value {
                    continue;
                }
                let keep_behind = (value_is_filled(behind_value)
                    && !value_is_filled(ahead_value))
                    || (value_is_filled(behind_value) == value_is_filled(ahead_value)
                        && write_time(behind, key) > write_time(ahead, key));
                if !keep_behind {
                    merged.insert(key.clone(), ahead_value.clone());
                }
            }
        }
    }
    merged
}

/// Per-key union of the two `field_updated_at` maps, newer stamp winning.
fn merge_field_stamps(behind: &ApplicationState, ahead: &ApplicationState) -> FormData {
    let mut merged = behind
        .metadata
        .get(META_FIELD_UPDATED_AT)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(stamps) = ahead
        .metadata
        .get(META_FIELD_UPDATED_AT)
        .and_then(Value::as_object)
    {
        for (key, value) in stamps {
            let newer = match merged.get(key).and_then(Value::as_str) {
                Some(existing) => value.as_str() > Some(existing),
                None => true,
            };
            if newer {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

fn merged_metadata(
    behind: &ApplicationState,
    ahead: &ApplicationState,
    merged_stamps: FormData,
    now: DateTime<Utc>,
) -> FormData {
    let mut metadata = behind.metadata.clone();
    for (key, value) in &ahead.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    metadata.insert(META_LAST_SYNC.to_string(), json!(now.to_rfc3339()));
    metadata.insert(META_SYNC_SOURCE.to_string(), json!(ahead.channel.label()));
    metadata.insert(META_MERGED_FROM.to_string(), json!(behind.session_id));
    if !merged_stamps.is_empty() {
        metadata.insert(META_FIELD_UPDATED_AT.to_string(), Value::Object(merged_stamps));
    }
    metadata
}

fn sync_patch(
    step: Step,
    form_data: &FormData,
    base_metadata: &FormData,
    channel: Channel,
) -> StatePatch {
    let mut metadata = base_metadata.clone();
    metadata.insert("platform".to_string(), json!(channel.label()));
    StatePatch {
        current_step: Some(step),
        form_data: Some(form_data.clone()),
        metadata: Some(metadata),
        ..StatePatch::default()
    }
}

fn latest_sync_time(left: &ApplicationState, right: &ApplicationState) -> Option<DateTime<Utc>> {
    let parse = |state: &ApplicationState| {
        state
            .metadata_str(META_LAST_SYNC)
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
    };
    match (parse(left), parse(right)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::intake::catalog::StaticCatalog;
    use crate::workflows::intake::codes::OsRngCodes;
    use crate::workflows::intake::store::MemoryStateStore;
    use chrono::Duration;

    fn engine() -> (SyncEngine<MemoryStateStore, StaticCatalog>, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let catalog = Arc::new(
            StaticCatalog::new().with_entry(CatalogKind::Category, "agri", "Agriculture"),
        );
        let codes = Arc::new(ReferenceCodeService::new(store.clone(), Arc::new(OsRngCodes)));
        (
            SyncEngine::new(store.clone(), catalog, codes, SessionLifetimes::default()),
            store,
        )
    }

    fn seed(
        store: &MemoryStateStore,
        session_id: &str,
        channel: Channel,
        step: Step,
        entries: &[(&str, Value)],
    ) -> ApplicationState {
        let mut form_data = FormData::new();
        for (key, value) in entries {
            form_data.insert((*key).to_string(), value.clone());
        }
        store
            .create(NewState {
                session_id: session_id.to_string(),
                channel,
                user_identifier: session_id.to_string(),
                current_step: step,
                form_data,
                metadata: FormData::new(),
                expires_at: Utc::now() + Duration::days(7),
                reference_code: None,
                reference_code_expires_at: None,
            })
            .expect("seed state")
    }

    #[test]
    fn merge_unions_fields_and_takes_the_later_step() {
        let (engine, store) = engine();
        seed(
            &store,
            "web_abc",
            Channel::Web,
            Step::Product,
            &[("language", json!("en")), ("category", json!("agri"))],
        );
        seed(
            &store,
            "whatsapp_263771234567",
            Channel::Whatsapp,
            Step::Account,
            &[
                ("language", json!("en")),
                ("selectedBusiness", json!({"id": "seeds", "name": "Seed Co"})),
            ],
        );

        let outcome = engine
            .synchronize("web_abc", "whatsapp_263771234567")
            .expect("synchronize");
        assert_eq!(outcome.current_step, Step::Account);
        // Behind record written first.
        assert_eq!(outcome.states[0].session_id, "web_abc");
        for state in &outcome.states {
            assert_eq!(state.current_step, Step::Account);
            assert_eq!(state.form_data["language"], json!("en"));
            assert_eq!(state.form_data["category"], json!("agri"));
            assert_eq!(state.form_data["selectedBusiness"]["id"], json!("seeds"));
            assert_eq!(state.metadata[META_SYNC_SOURCE], json!("whatsapp"));
        }
        assert_eq!(
            outcome.states[1].metadata[META_MERGED_FROM],
            json!("web_abc")
        );
    }

    #[test]
    fn newer_field_stamp_wins_a_conflict() {
        let (engine, store) = engine();
        let web = seed(
            &store,
            "web_abc",
            Channel::Web,
            Step::Account,
            &[("employer", json!("government"))],
        );
        let old = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let new = Utc::now().to_rfc3339();
        store
            .update(
                "web_abc",
                web.version,
                StatePatch {
                    metadata: Some(
                        [(
                            META_FIELD_UPDATED_AT.to_string(),
                            json!({"employer": new}),
                        )]
                        .into_iter()
                        .collect(),
                    ),
                    ..StatePatch::default()
                },
            )
            .expect("stamp web");

        let whatsapp = seed(
            &store,
            "whatsapp_263771234567",
            Channel::Whatsapp,
            Step::Summary,
            &[("employer", json!("private"))],
        );
        store
            .update(
                "whatsapp_263771234567",
                whatsapp.version,
                StatePatch {
                    metadata: Some(
                        [(
                            META_FIELD_UPDATED_AT.to_string(),
                            json!({"employer": old}),
                        )]
                        .into_iter()
                        .collect(),
                    ),
                    ..StatePatch::default()
                },
            )
            .expect("stamp whatsapp");

        let outcome = engine
            .synchronize("web_abc", "whatsapp_263771234567")
            .expect("synchronize");
        // WhatsApp is further along, but web wrote `employer` later.
        for state in &outcome.states {
            assert_eq!(state.form_data["employer"], json!("government"));
        }
    }

    #[test]
    fn empty_values_never_overwrite_filled_ones() {
        let (engine, store) = engine();
        seed(
            &store,
            "web_abc",
            Channel::Web,
            Step::Product,
            &[("intent", json!("loan"))],
        );
        seed(
            &store,
            "whatsapp_263771234567",
            Channel::Whatsapp,
            Step::Summary,
            &[("intent", json!(""))],
        );
        let outcome = engine
            .synchronize("web_abc", "whatsapp_263771234567")
            .expect("synchronize");
        for state in &outcome.states {
            assert_eq!(state.form_data["intent"], json!("loan"));
        }
    }

    #[test]
    fn missing_pair_is_an_error_but_single_side_is_a_no_op() {
        let (engine, store) = engine();
        assert!(matches!(
            engine.synchronize("web_a", "web_b").unwrap_err(),
            SyncError::NoStatesFound
        ));
        seed(&store, "web_a", Channel::Web, Step::Product, &[]);
        let outcome = engine.synchronize("web_a", "web_b").expect("single side");
        assert_eq!(outcome.states.len(), 1);
        assert_eq!(outcome.states[0].version, 1);
    }

    #[test]
    fn switch_to_whatsapp_creates_and_issues_a_code() {
        let (engine, store) = engine();
        seed(
            &store,
            "web_abc",
            Channel::Web,
            Step::Account,
            &[("category", json!("agri"))],
        );
        let switch = engine
            .switch_to_whatsapp("web_abc", "+263 77 987-6543")
            .expect("switch");
        assert_eq!(switch.whatsapp_session_id, "whatsapp_263779876543");
        assert!(switch.created);
        assert_eq!(switch.reference_code.len(), 6);

        let created = store
            .get("whatsapp_263779876543")
            .expect("get")
            .expect("created");
        assert_eq!(created.channel, Channel::Whatsapp);
        assert_eq!(created.user_identifier, "263779876543");
        assert_eq!(created.metadata[META_CREATED_FROM_WEB], json!("web_abc"));
        assert_eq!(
            created.metadata[META_PLATFORM_SWITCH_TIME],
            json!(switch.sync_timestamp.to_rfc3339())
        );
        // Flat category rebuilt into a rich object for whatsapp.
        assert_eq!(
            created.form_data["selectedCategory"],
            json!({"id": "agri", "name": "Agriculture"})
        );
    }

    #[test]
    fn switch_to_whatsapp_merges_into_an_existing_session() {
        let (engine, store) = engine();
        seed(&store, "web_abc", Channel::Web, Step::Product, &[("language", json!("en"))]);
        seed(
            &store,
            "whatsapp_263779876543",
            Channel::Whatsapp,
            Step::Summary,
            &[("employer", json!("sme"))],
        );
        let switch = engine
            .switch_to_whatsapp("web_abc", "263779876543")
            .expect("switch");
        assert!(!switch.created);
        assert_eq!(switch.current_step, Step::Summary);
        let merged = store.get("whatsapp_263779876543").expect("get").expect("present");
        assert_eq!(merged.form_data["language"], json!("en"));
        // The merged record still carries the switch provenance.
        assert_eq!(merged.metadata[META_CREATED_FROM_WEB], json!("web_abc"));
        assert_eq!(
            merged.metadata[META_PLATFORM_SWITCH_TIME],
            json!(switch.sync_timestamp.to_rfc3339())
        );
    }

    #[test]
    fn switch_to_web_mints_a_session_id_when_none_given() {
        let (engine, store) = engine();
        seed(
            &store,
            "whatsapp_263779876543",
            Channel::Whatsapp,
            Step::Form,
            &[("selectedCategory", json!({"id": "agri", "name": "Agriculture"}))],
        );
        let switch = engine
            .switch_to_web("whatsapp_263779876543", None)
            .expect("switch");
        assert!(switch.created);
        assert!(switch.web_session_id.starts_with("web_"));
        let created = store
            .get(&switch.web_session_id)
            .expect("get")
            .expect("created");
        assert_eq!(created.metadata[META_CREATED_FROM_WHATSAPP], json!("whatsapp_263779876543"));
        // Rich object flattened for web while the object survives.
        assert_eq!(created.form_data["category"], json!("agri"));
        assert!(created.form_data.contains_key("selectedCategory"));
    }

    #[test]
    fn switch_to_web_merges_into_an_existing_session() {
        let (engine, store) = engine();
        seed(
            &store,
            "whatsapp_263779876543",
            Channel::Whatsapp,
            Step::Summary,
            &[("employer", json!("sme"))],
        );
        seed(&store, "web_abc", Channel::Web, Step::Product, &[("language", json!("en"))]);
        let switch = engine
            .switch_to_web("whatsapp_263779876543", Some("web_abc"))
            .expect("switch");
        assert!(!switch.created);
        assert_eq!(switch.current_step, Step::Summary);
        let merged = store.get("web_abc").expect("get").expect("present");
        assert_eq!(
            merged.metadata[META_CREATED_FROM_WHATSAPP],
            json!("whatsapp_263779876543")
        );
        assert_eq!(
            merged.metadata[META_PLATFORM_SWITCH_TIME],
            json!(switch.sync_timestamp.to_rfc3339())
        );
    }

    #[test]
    fn sync_status_reports_divergence_only_when_both_sides_are_filled() {
        let (engine, store) = engine();
        seed(
            &store,
            "web_abc",
            Channel::Web,
            Step::Product,
            &[("language", json!("en")), ("intent", json!(""))],
        );
        seed(
            &store,
            "whatsapp_263779876543",
            Channel::Whatsapp,
            Step::Product,
            &[("language", json!("sn")), ("intent", json!("loan"))],
        );
        let status = engine
            .get_sync_status("web_abc", "whatsapp_263779876543")
            .expect("status");
        assert_eq!(status.status, SyncStatusKind::Diverged);
        assert_eq!(status.inconsistencies.len(), 1);
        assert_eq!(status.inconsistencies[0].field, "language");

        assert!(matches!(
            engine.get_sync_status("web_abc", "missing").unwrap_err(),
            SyncError::NoStatesFound
        ));
    }
}
