use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;
use uuid::Uuid;

use super::database::{map_db_err, opt_ts_col, ts_col, uuid_col, Database, StoreError};
use super::models::{format_timestamp, Invitation, InvitationStatus, NewInvitation};
use crate::changefeed::{ChangeKind, ChangeTable};

const INVITATION_COLUMNS: &str = "id, company_id, job_id, candidate_email, candidate_name, \
     status, expires_at, interview_completed_at, final_score, created_at, updated_at";

fn invitation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    let status: String = row.get(5)?;
    Ok(Invitation {
        id: uuid_col(row, 0)?,
        company_id: row.get(1)?,
        job_id: row.get(2)?,
        candidate_email: row.get(3)?,
        candidate_name: row.get(4)?,
        status: InvitationStatus::parse(&status).unwrap_or(InvitationStatus::Scheduled),
        expires_at: opt_ts_col(row, 6)?,
        interview_completed_at: opt_ts_col(row, 7)?,
        final_score: row.get(8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

/// `'a', 'b'` list for an `IN (...)` clause; statuses are fixed identifiers
fn status_list(statuses: &[InvitationStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    pub async fn insert_invitation(&self, new: NewInvitation) -> Result<Invitation, StoreError> {
        let id = Uuid::new_v4();
        let now = format_timestamp(&Utc::now());
        let expires_at = new.expires_at.as_ref().map(format_timestamp);
        let sql = format!(
            "INSERT INTO interview_invitations \
             (id, company_id, job_id, candidate_email, candidate_name, status, expires_at, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, ?7, ?7) \
             RETURNING {}",
            INVITATION_COLUMNS
        );

        let invitation = self
            .conn
            .call(move |conn| {
                let invitation = conn.query_row(
                    &sql,
                    rusqlite::params![
                        id.to_string(),
                        new.company_id,
                        new.job_id,
                        new.candidate_email,
                        new.candidate_name,
                        expires_at,
                        now,
                    ],
                    invitation_from_row,
                )?;
                Ok(invitation)
            })
            .await
            .map_err(map_db_err)?;

        self.notify(
            ChangeTable::InterviewInvitations,
            ChangeKind::Insert,
            Some(invitation.company_id.clone()),
            invitation.id,
        )
        .await;

        Ok(invitation)
    }

    pub async fn get_invitation(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let sql = format!(
            "SELECT {} FROM interview_invitations WHERE id = ?1",
            INVITATION_COLUMNS
        );
        self.conn
            .call(move |conn| {
                let invitation = conn
                    .query_row(&sql, [id.to_string()], invitation_from_row)
                    .optional()?;
                Ok(invitation)
            })
            .await
            .map_err(map_db_err)
    }

    /// Move an invitation forward to `to` if its current status allows it.
    ///
    /// Returns `false` when the invitation is missing or already past `to`.
    /// `completed` is reserved for transcript persistence and is refused here.
    pub async fn advance_invitation(
        &self,
        id: Uuid,
        to: InvitationStatus,
    ) -> Result<bool, StoreError> {
        if to == InvitationStatus::Completed {
            return Err(StoreError::ForbiddenTransition(to));
        }
        self.transition_invitation(id, to, None).await
    }

    /// Mark an invitation completed at `at`
    pub(crate) async fn complete_invitation(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.transition_invitation(id, InvitationStatus::Completed, Some(at))
            .await
    }

    async fn transition_invitation(
        &self,
        id: Uuid,
        to: InvitationStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let now = format_timestamp(&Utc::now());
        let completed_at = completed_at.as_ref().map(format_timestamp);
        let sql = format!(
            "UPDATE interview_invitations \
             SET status = ?1, updated_at = ?2, \
                 interview_completed_at = COALESCE(?3, interview_completed_at) \
             WHERE id = ?4 AND status IN ({}) \
             RETURNING company_id",
            status_list(to.predecessors())
        );

        let company_id = self
            .conn
            .call(move |conn| {
                let company: Option<String> = conn
                    .query_row(
                        &sql,
                        rusqlite::params![to.as_str(), now, completed_at, id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(company)
            })
            .await
            .map_err(map_db_err)?;

        match company_id {
            Some(company_id) => {
                debug!("Invitation {} moved to {}", id, to);
                self.notify(
                    ChangeTable::InterviewInvitations,
                    ChangeKind::Update,
                    Some(company_id),
                    id,
                )
                .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record the final interview score without touching status
    pub async fn record_final_score(&self, id: Uuid, score: f64) -> Result<bool, StoreError> {
        let now = format_timestamp(&Utc::now());
        let company_id = self
            .conn
            .call(move |conn| {
                let company: Option<String> = conn
                    .query_row(
                        "UPDATE interview_invitations SET final_score = ?1, updated_at = ?2 \
                         WHERE id = ?3 RETURNING company_id",
                        rusqlite::params![score, now, id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(company)
            })
            .await
            .map_err(map_db_err)?;

        match company_id {
            Some(company_id) => {
                self.notify(
                    ChangeTable::InterviewInvitations,
                    ChangeKind::Update,
                    Some(company_id),
                    id,
                )
                .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::{ChangeSource, LocalChangeBus};
    use futures::StreamExt;
    use std::sync::Arc;

    async fn db() -> (Database, LocalChangeBus) {
        let bus = LocalChangeBus::new();
        let db = Database::open_in_memory(Arc::new(bus.clone())).await.unwrap();
        (db, bus)
    }

    fn new_invitation() -> NewInvitation {
        NewInvitation {
            company_id: "acme".to_string(),
            job_id: Some("job-1".to_string()),
            candidate_email: "ada@example.com".to_string(),
            candidate_name: Some("Ada".to_string()),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (db, _) = db().await;
        let inv = db.insert_invitation(new_invitation()).await.unwrap();
        assert_eq!(inv.status, InvitationStatus::Scheduled);

        let fetched = db.get_invitation(inv.id).await.unwrap().unwrap();
        assert_eq!(fetched.candidate_email, "ada@example.com");
        assert!(db.get_invitation(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transitions_only_move_forward() {
        let (db, _) = db().await;
        let inv = db.insert_invitation(new_invitation()).await.unwrap();

        assert!(db
            .advance_invitation(inv.id, InvitationStatus::Opened)
            .await
            .unwrap());
        assert!(db
            .advance_invitation(inv.id, InvitationStatus::Started)
            .await
            .unwrap());
        // Backwards is a no-op
        assert!(!db
            .advance_invitation(inv.id, InvitationStatus::Sent)
            .await
            .unwrap());
        assert!(db.complete_invitation(inv.id, Utc::now()).await.unwrap());
        assert!(!db.complete_invitation(inv.id, Utc::now()).await.unwrap());
        assert!(!db
            .advance_invitation(inv.id, InvitationStatus::Cancelled)
            .await
            .unwrap());

        let fetched = db.get_invitation(inv.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, InvitationStatus::Completed);
        assert!(fetched.interview_completed_at.is_some());
    }

    #[tokio::test]
    async fn test_completed_is_refused_outside_persistence() {
        let (db, _) = db().await;
        let inv = db.insert_invitation(new_invitation()).await.unwrap();
        let err = db
            .advance_invitation(inv.id, InvitationStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForbiddenTransition(_)));
    }

    #[tokio::test]
    async fn test_final_score_keeps_status_and_notifies() {
        let (db, bus) = db().await;
        let inv = db.insert_invitation(new_invitation()).await.unwrap();
        let mut changes = bus
            .subscribe("acme", &[ChangeTable::InterviewInvitations])
            .await
            .unwrap();

        assert!(db.record_final_score(inv.id, 87.5).await.unwrap());
        let fetched = db.get_invitation(inv.id).await.unwrap().unwrap();
        assert_eq!(fetched.final_score, Some(87.5));
        assert_eq!(fetched.status, InvitationStatus::Scheduled);

        let change = changes.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.record_id, inv.id.to_string());
    }
}
