use sqlx::Row;

use super::{StateError, StateStore};
use crate::model::{Direction, ItemKind, PairingRecord};

impl StateStore {
    pub async fn save_pairings(
        &self,
        kind: ItemKind,
        records: &[PairingRecord],
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pairings WHERE kind = ?1")
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        for record in records {
            sqlx::query(
                "INSERT INTO pairings (kind, local_name, local_handle, remote_name, remote_handle, direction)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(kind.as_str())
            .bind(&record.local_name)
            .bind(&record.local_handle)
            .bind(&record.remote_name)
            .bind(&record.remote_handle)
            .bind(record.direction.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_pairings(&self, kind: ItemKind) -> Result<Vec<PairingRecord>, StateError> {
        let rows = sqlx::query(
            "SELECT local_name, local_handle, remote_name, remote_handle, direction
             FROM pairings
             WHERE kind = ?1
             ORDER BY id ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let direction: String = row.try_get("direction")?;
            out.push(PairingRecord {
                local_name: row.try_get("local_name")?,
                local_handle: row.try_get("local_handle")?,
                remote_name: row.try_get("remote_name")?,
                remote_handle: row.try_get("remote_handle")?,
                direction: Direction::parse(&direction)
                    .ok_or(StateError::InvalidDirection(direction))?,
            });
        }
        Ok(out)
    }
}
