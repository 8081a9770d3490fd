use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_capacity, free_slot, validate_span, validate_text};
use super::{Engine, EngineError};

impl Engine {
    /// Admit a reservation if the resource has a free slot for the whole
    /// interval. First come, first served.
    pub async fn try_reserve(&self, principal: &Principal, req: NewReservation) -> Result<TimeSpan, EngineError> {
        let span = validate_span(req.start, req.end)?;
        validate_text(req.title.as_deref(), req.description.as_deref())?;

        // Directory lookup happens before the critical section.
        let resource = self
            .directory
            .resource(req.resource_id)
            .await
            .ok_or(EngineError::ResourceNotFound(req.resource_id))?;
        if !principal.can_see(&resource.department) {
            return Err(EngineError::NotAuthorized);
        }

        let mut record = TimeSpan {
            id: req.id,
            title: req.title.unwrap_or_else(|| resource.name.clone()),
            description: req
                .description
                .unwrap_or_else(|| format!("{}:{}", resource.group, resource.name)),
            span,
            kind: TimeSpanKind::ResourceReservation,
            department: resource.department,
            resource: Some(resource.id),
            slot: None,
            owner: principal.user_id,
        };

        let shared = self.index(resource.id);
        let mut guard = shared.write().await;
        if guard.get(record.id).is_some() {
            return Err(EngineError::AlreadyExists(record.id));
        }
        if guard.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        if let Err(e) = check_capacity(&guard, &span, resource.slots) {
            debug!("rejected [{}, {}) on {}: {e}", span.start, span.end, resource.id);
            return Err(e);
        }
        record.slot = free_slot(&guard, &span, resource.slots);
        if record.slot.is_none() {
            debug!("admitted {} without a slot free for all of [{}, {})", record.id, span.start, span.end);
        }

        self.insert_or_compensate(&record).await?;
        guard.insert(record.clone());
        info!(
            "reserved {} [{}, {}) for {} as {}",
            resource.id, span.start, span.end, principal.user_id, record.id
        );
        Ok(record)
    }

    /// Record an illness or vacation for the caller under their primary
    /// department. Absences never occupy a resource.
    pub async fn register_absence(&self, principal: &Principal, req: NewAbsence) -> Result<TimeSpan, EngineError> {
        if !req.kind.is_absence() {
            return Err(EngineError::InvalidKind(req.kind));
        }
        let span = validate_span(req.start, req.end)?;
        validate_text(req.title.as_deref(), req.description.as_deref())?;
        let department = principal
            .primary_department()
            .ok_or(EngineError::NotAuthorized)?;

        let record = TimeSpan {
            id: req.id,
            title: req.title.unwrap_or_else(|| req.kind.as_str().to_string()),
            description: req.description.unwrap_or_default(),
            span,
            kind: req.kind,
            department,
            resource: None,
            slot: None,
            owner: principal.user_id,
        };
        self.insert_or_compensate(&record).await?;
        info!("registered {} [{}, {}) for {}", record.kind, span.start, span.end, principal.user_id);
        Ok(record)
    }

    /// Delete a reservation or absence. Only its owner or an administrator
    /// may do this.
    pub async fn cancel(&self, principal: &Principal, id: Ulid) -> Result<TimeSpan, EngineError> {
        let record = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        if record.owner != principal.user_id && !principal.admin {
            return Err(EngineError::Forbidden(id));
        }

        let removed = match record.resource {
            Some(resource_id) => {
                let shared = self.index(resource_id);
                let mut guard = shared.write().await;
                // A concurrent cancel may have won the lock first.
                let removed = self
                    .bounded(self.store.remove(id))
                    .await?
                    .ok_or(EngineError::NotFound(id))?;
                guard.remove(id);
                removed
            }
            None => self
                .bounded(self.store.remove(id))
                .await?
                .ok_or(EngineError::NotFound(id))?,
        };
        info!("cancelled {} {} by {}", removed.kind, id, principal.user_id);
        Ok(removed)
    }

    /// Change the mutable fields of a timespan. The interval of a
    /// reservation is fixed; only absences may be moved.
    pub async fn amend(&self, principal: &Principal, id: Ulid, patch: TimeSpanPatch) -> Result<TimeSpan, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::InvalidPatch("nothing to change"));
        }
        validate_text(patch.title.as_deref(), patch.description.as_deref())?;

        let record = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        if record.owner != principal.user_id && !principal.admin {
            return Err(EngineError::Forbidden(id));
        }
        if record.is_reservation() && patch.span.is_some() {
            return Err(EngineError::InvalidPatch("the interval of a reservation cannot be changed"));
        }

        let mut updated = record.clone();
        if let Some(title) = patch.title {
            updated.title = title;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some((start, end)) = patch.span {
            updated.span = validate_span(start, end)?;
        }

        match record.resource {
            Some(resource_id) => {
                let shared = self.index(resource_id);
                let mut guard = shared.write().await;
                self.bounded(self.store.replace(updated.clone()))
                    .await?
                    .ok_or(EngineError::NotFound(id))?;
                guard.replace(updated.clone());
            }
            None => {
                self.bounded(self.store.replace(updated.clone()))
                    .await?
                    .ok_or(EngineError::NotFound(id))?;
            }
        }
        debug!("amended {id}");
        Ok(updated)
    }

    /// Delete every reservation that ended at or before `cutoff`. Returns the
    /// number removed.
    pub async fn purge_ended(&self, cutoff: Ms) -> Result<usize, EngineError> {
        let mut purged = 0;
        for resource_id in self.indexed_resources() {
            let Some(shared) = self.get_index(&resource_id) else {
                continue;
            };
            let mut guard = shared.write().await;
            for id in guard.ended_by(cutoff) {
                self.bounded(self.store.remove(id)).await?;
                guard.remove(id);
                purged += 1;
            }
        }
        if purged > 0 {
            info!("purged {purged} reservations ended before {cutoff}");
        }
        Ok(purged)
    }
}
