// Tagging service - Manual tags and soft-delete untagging
use crate::application::manual_event_store::{ManualEventKey, ManualStores, NewManualEvent, UntagOutcome};
use crate::domain::event::Event;
use crate::domain::machine::data_source_id_from_name;
use crate::domain::session::SessionState;
use crate::domain::telemetry::TimeWindow;
use chrono::Utc;
use chrono_tz::Tz;

#[derive(Clone)]
pub struct TaggingService {
    stores: ManualStores,
    timezone: Tz,
}

impl TaggingService {
    pub fn new(stores: ManualStores, timezone: Tz) -> Self {
        Self { stores, timezone }
    }

    /// Appends a manual event for the session user and returns it as reloaded from the store.
    pub async fn tag(
        &self,
        session: &mut SessionState,
        machine_id: i64,
        channels: &[String],
        window: TimeWindow,
    ) -> anyhow::Result<Option<Event>> {
        let data_source_ids = channels
            .iter()
            .map(|name| data_source_id_from_name(name))
            .collect::<Result<Vec<i64>, _>>()?;
        let tagging = &session.config.manual_tagging;
        let event = NewManualEvent {
            machine_id,
            data_source_ids,
            window,
            username: tagging.username.clone(),
            insert_timestamp: Utc::now().with_timezone(&self.timezone).naive_local(),
            pipelines_configurations: session.config.pipeline.versions.snapshot_json(),
        };

        self.stores.select(tagging.use_db).append(&event).await?;
        tracing::info!(machine_id, username = %event.username, %window, "manual event tagged");

        self.reload(session).await;
        Ok(session
            .caches
            .manual
            .iter()
            .rev()
            .find(|e| {
                e.machine_id == machine_id
                    && e.start_timestamp == window.start
                    && e.end_timestamp == window.end
                    && e.manual().is_some_and(|info| info.username == event.username)
            })
            .cloned())
    }

    /// Soft-deletes `event`. Nothing changes unless exactly one row matches.
    pub async fn untag(&self, session: &mut SessionState, event: &Event) -> anyhow::Result<UntagOutcome> {
        let Some(key) = ManualEventKey::of(event) else {
            anyhow::bail!("event {} is not a manual event", event.event_id);
        };
        let outcome = self
            .stores
            .select(session.config.manual_tagging.use_db)
            .deprecate(&key)
            .await?;

        match outcome {
            UntagOutcome::Deprecated => {
                tracing::info!(event_id = key.event_id, machine_id = key.machine_id, "manual event deprecated");
                self.reload(session).await;
            }
            UntagOutcome::Aborted(matches) => {
                tracing::warn!(
                    event_id = key.event_id,
                    matches,
                    "Too much data is fitting the conditions, aborting untagging of event {}",
                    key.event_id
                );
            }
        }
        Ok(outcome)
    }

    /// Re-reads manual events from the store selected by `use_db`.
    pub async fn reload(&self, session: &mut SessionState) {
        let tagging = &session.config.manual_tagging;
        let store = self.stores.select(tagging.use_db);
        session.caches.manual = store.load(tagging.show_deprecated).await.unwrap_or_else(|e| {
            tracing::warn!("Could not load manual events: {}", e);
            Vec::new()
        });
    }
}
