//! Lifting a suspension with points.
//!
//! A customer serving a suspension from a high enough offense may pay points
//! to end it early. The lift and the debit commit together, and a repeated
//! request after a successful lift reports the earlier outcome instead of
//! charging again.

use std::sync::atomic::Ordering;

use sea_orm::Set;
use serde::Serialize;
use serde_json::json;
use surplus_common::{AppError, AppResult, IdGenerator, PolicyConfig, SharedClock, get_metrics};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        point_transaction,
        user_penalty::{self, LiftReason},
    },
    repositories::{PenaltyRepository, PointsRepository},
};

use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};

/// Ledger reason for a cooldown lift.
pub const COOLDOWN_LIFT_REASON: &str = "cooldown_lift";

/// Result of a lift request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LiftOutcome {
    /// The suspension ended now and the points were taken.
    #[serde(rename_all = "camelCase")]
    Lifted {
        penalty: user_penalty::Model,
        points_spent: i64,
        new_balance: i64,
    },
    /// The suspension had already been lifted with points; nothing was charged.
    #[serde(rename_all = "camelCase")]
    AlreadyLifted { balance: i64 },
}

/// Cooldown service for business logic.
#[derive(Clone)]
pub struct CooldownService {
    penalty_repo: PenaltyRepository,
    points_repo: PointsRepository,
    policy: PolicyConfig,
    clock: SharedClock,
    notifier: NotifierService,
    id_gen: IdGenerator,
}

impl CooldownService {
    /// Create a new cooldown service.
    #[must_use]
    pub fn new(
        penalty_repo: PenaltyRepository,
        points_repo: PointsRepository,
        policy: PolicyConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            penalty_repo,
            points_repo,
            policy,
            clock,
            notifier: noop_notifier(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the notifier.
    pub fn set_notifier(&mut self, notifier: NotifierService) {
        self.notifier = notifier;
    }

    /// Pay points to end the user's current suspension.
    pub async fn lift_with_points(&self, user_id: &str) -> AppResult<LiftOutcome> {
        let now = self.clock.now();
        let cost = self.policy.cooldown_lift_cost;

        let suspension = self
            .penalty_repo
            .find_current_suspension(user_id, now)
            .await?
            .ok_or_else(|| AppError::NotEligible("No suspension to lift".to_string()))?;

        if !suspension.is_active {
            if suspension.lift_reason == Some(LiftReason::PointsPaid) {
                let balance = self
                    .points_repo
                    .get_balance(self.points_repo.connection(), user_id)
                    .await?;
                return Ok(LiftOutcome::AlreadyLifted { balance });
            }
            return Err(AppError::NotEligible(
                "Suspension is no longer active".to_string(),
            ));
        }

        if suspension.offense_number < self.policy.cooldown_lift_min_offense {
            return Err(AppError::NotEligible(format!(
                "Only suspensions from offense {} onward can be lifted with points",
                self.policy.cooldown_lift_min_offense
            )));
        }

        let balance = self
            .points_repo
            .get_balance(self.points_repo.connection(), user_id)
            .await?;
        if balance < cost {
            return Err(AppError::InsufficientPoints {
                required: cost,
                available: balance,
            });
        }

        let txn = self.points_repo.begin().await?;
        if !self
            .penalty_repo
            .deactivate(&txn, &suspension.id, LiftReason::PointsPaid, Some(cost), now)
            .await?
        {
            drop(txn);
            let balance = self
                .points_repo
                .get_balance(self.points_repo.connection(), user_id)
                .await?;
            return Ok(LiftOutcome::AlreadyLifted { balance });
        }

        if !self.points_repo.debit(&txn, user_id, cost, now).await? {
            let available = self.points_repo.get_balance(&txn, user_id).await?;
            return Err(AppError::InsufficientPoints {
                required: cost,
                available,
            });
        }

        let new_balance = self.points_repo.get_balance(&txn, user_id).await?;
        self.points_repo
            .record_transaction(
                &txn,
                point_transaction::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    user_id: Set(user_id.to_string()),
                    change: Set(-cost),
                    reason: Set(COOLDOWN_LIFT_REASON.to_string()),
                    reference_id: Set(Some(suspension.id.clone())),
                    balance_before: Set(new_balance + cost),
                    balance_after: Set(new_balance),
                    created_at: Set(now.into()),
                },
            )
            .await?;

        txn.commit()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        get_metrics()
            .cooldowns_lifted
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            user_id = %user_id,
            penalty_id = %suspension.id,
            points_spent = cost,
            new_balance,
            "Suspension lifted with points"
        );

        let mut lifted = suspension;
        lifted.is_active = false;
        lifted.lifted_at = Some(now.into());
        lifted.lift_reason = Some(LiftReason::PointsPaid);
        lifted.points_spent = Some(cost);

        dispatch(
            &self.notifier,
            Notice::new(
                user_id,
                NotificationKind::CooldownLifted,
                json!({
                    "penaltyId": lifted.id,
                    "pointsSpent": cost,
                    "newBalance": new_balance,
                }),
            ),
        )
        .await;

        Ok(LiftOutcome::Lifted {
            penalty: lifted,
            points_spent: cost,
            new_balance,
        })
    }
}
