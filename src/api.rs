use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::directory::Authenticator;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{AUTH_FAILURES_TOTAL, RESERVATIONS_ACCEPTED_TOTAL, RESERVATIONS_REJECTED_TOTAL};

/// Transport-neutral entry point: resolves the caller's API key, then hands
/// off to the engine. An unknown key and a missing permission look the same
/// to the caller.
pub struct ReservationApi {
    engine: Arc<Engine>,
    authenticator: Arc<dyn Authenticator>,
}

impl ReservationApi {
    pub fn new(engine: Arc<Engine>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            engine,
            authenticator,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    async fn principal(&self, api_key: &str) -> Result<Principal, EngineError> {
        match self.authenticator.authenticate(api_key).await {
            Some(p) => Ok(p),
            None => {
                metrics::counter!(AUTH_FAILURES_TOTAL, "kind" => "api_key").increment(1);
                debug!("rejected unknown api key");
                Err(EngineError::NotAuthorized)
            }
        }
    }

    pub async fn reserve(&self, api_key: &str, req: NewReservation) -> Result<TimeSpan, EngineError> {
        let principal = self.principal(api_key).await?;
        let result = self.engine.try_reserve(&principal, req).await;
        match &result {
            Ok(_) => metrics::counter!(RESERVATIONS_ACCEPTED_TOTAL).increment(1),
            Err(e) => metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => e.reason_label()).increment(1),
        }
        result
    }

    pub async fn register_absence(&self, api_key: &str, req: NewAbsence) -> Result<TimeSpan, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.register_absence(&principal, req).await
    }

    pub async fn cancel(&self, api_key: &str, id: Ulid) -> Result<TimeSpan, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.cancel(&principal, id).await
    }

    pub async fn amend(&self, api_key: &str, id: Ulid, patch: TimeSpanPatch) -> Result<TimeSpan, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.amend(&principal, id, patch).await
    }

    /// Department view. The department token is the credential here.
    pub async fn reservations(&self, department_token: &str, window: Window) -> Result<Vec<TimeSpan>, EngineError> {
        self.engine.for_department(department_token, window).await
    }

    /// The caller's own timespans.
    pub async fn calendar(
        &self,
        api_key: &str,
        kind: Option<TimeSpanKind>,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.user_calendar(principal.user_id, kind, window).await
    }

    /// Someone else's timespans, for callers allowed to read them.
    pub async fn calendar_of(
        &self,
        api_key: &str,
        user_id: Ulid,
        kind: Option<TimeSpanKind>,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.calendar_of(&principal, user_id, kind, window).await
    }

    pub async fn group_reservations(
        &self,
        api_key: &str,
        group: &str,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.group_reservations(&principal, group, window).await
    }

    pub async fn resource_reservations(
        &self,
        api_key: &str,
        resource_id: Ulid,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.resource_reservations(&principal, resource_id, window).await
    }

    pub async fn availability(
        &self,
        api_key: &str,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine
            .availability(&principal, resource_id, start, end, min_duration)
            .await
    }

    pub async fn occupancy(&self, api_key: &str, resource_id: Ulid, at: Ms) -> Result<Occupancy, EngineError> {
        let principal = self.principal(api_key).await?;
        self.engine.slots_in_use(&principal, resource_id, at).await
    }
}
