use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::availability;
use super::conflict::{validate_span, validate_window};
use super::{Engine, EngineError};

fn sort_by_start(records: &mut [TimeSpan]) {
    records.sort_by_key(|r| (r.span.start, r.id));
}

impl Engine {
    /// Reservations of the department behind `token` that intersect the
    /// window, ascending by start. The token is the only credential.
    pub async fn for_department(&self, token: &str, window: Window) -> Result<Vec<TimeSpan>, EngineError> {
        validate_window(&window)?;
        let department = self
            .directory
            .department_by_token(token)
            .await
            .ok_or(EngineError::NotAuthorized)?;

        let mut records = self.store.by_department(department, window).await?;
        records.retain(TimeSpan::is_reservation);
        sort_by_start(&mut records);
        Ok(records)
    }

    /// Every timespan the user owns, of any kind, ascending by start.
    pub async fn for_user(&self, user_id: Ulid) -> Result<Vec<TimeSpan>, EngineError> {
        self.user_calendar(user_id, None, Window::all()).await
    }

    /// The user's timespans narrowed to one kind and/or a window.
    pub async fn user_calendar(
        &self,
        user_id: Ulid,
        kind: Option<TimeSpanKind>,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        validate_window(&window)?;
        let mut records = self.store.by_owner(user_id).await?;
        records.retain(|r| kind.is_none_or(|k| r.kind == k) && window.intersects(&r.span));
        sort_by_start(&mut records);
        Ok(records)
    }

    /// Another user's timespans. Only the user themselves and administrators
    /// may read them; anyone else gets the same answer as an unknown key.
    pub async fn calendar_of(
        &self,
        principal: &Principal,
        user_id: Ulid,
        kind: Option<TimeSpanKind>,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        if principal.user_id != user_id && !principal.admin {
            return Err(EngineError::NotAuthorized);
        }
        self.user_calendar(user_id, kind, window).await
    }

    /// Reservations on every resource of `group` the caller can see, ascending
    /// by start.
    pub async fn group_reservations(
        &self,
        principal: &Principal,
        group: &str,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        validate_window(&window)?;
        let query = window.clamp(MIN_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS);
        if query.start >= query.end {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for resource in self.directory.resources_in_group(group).await {
            if !principal.can_see(&resource.department) {
                continue;
            }
            if let Some(shared) = self.get_index(&resource.id) {
                let guard = shared.read().await;
                records.extend(guard.overlapping(&query).cloned());
            }
        }
        sort_by_start(&mut records);
        Ok(records)
    }

    async fn visible_resource(&self, principal: &Principal, resource_id: Ulid) -> Result<Resource, EngineError> {
        let resource = self
            .directory
            .resource(resource_id)
            .await
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        if !principal.can_see(&resource.department) {
            return Err(EngineError::NotAuthorized);
        }
        Ok(resource)
    }

    /// Reservations on one resource that intersect the window, ascending by start.
    pub async fn resource_reservations(
        &self,
        principal: &Principal,
        resource_id: Ulid,
        window: Window,
    ) -> Result<Vec<TimeSpan>, EngineError> {
        validate_window(&window)?;
        self.visible_resource(principal, resource_id).await?;
        let Some(shared) = self.get_index(&resource_id) else {
            return Ok(Vec::new());
        };
        let query = window.clamp(MIN_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS);
        if query.start >= query.end {
            return Ok(Vec::new());
        }
        let guard = shared.read().await;
        Ok(guard.overlapping(&query).cloned().collect())
    }

    /// Reservations on the resource active at `at`.
    pub async fn slots_in_use(&self, principal: &Principal, resource_id: Ulid, at: Ms) -> Result<Occupancy, EngineError> {
        if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        let resource = self.visible_resource(principal, resource_id).await?;
        let in_use = match self.get_index(&resource_id) {
            Some(shared) => {
                let guard = shared.read().await;
                guard.overlapping(&Span::new(at, at + 1)).count() as u32
            }
            None => 0,
        };
        Ok(Occupancy {
            resource_id,
            at,
            in_use,
            slots: resource.slots,
        })
    }

    /// Sub-ranges of `[start, end)` with at least one free slot, optionally
    /// only those lasting `min_duration` or longer.
    pub async fn availability(
        &self,
        principal: &Principal,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let window = validate_span(start, end)?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let resource = self.visible_resource(principal, resource_id).await?;
        // Nothing can ever be admitted on a resource without slots.
        if resource.slots == 0 {
            return Ok(Vec::new());
        }
        let busy: Vec<Span> = match self.get_index(&resource_id) {
            Some(shared) => {
                let guard = shared.read().await;
                guard.overlapping(&window).map(|r| r.span).collect()
            }
            None => Vec::new(),
        };
        Ok(availability(&busy, &window, resource.slots, min_duration))
    }
}
