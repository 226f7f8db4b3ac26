use sqlx::{Row, Sqlite, Transaction};
use time::OffsetDateTime;

use super::{StateError, StateStore};
use crate::model::{ItemKind, Side, SnapshotEntry};

impl StateStore {
    /// Replaces every row for `(kind, container, side)` in one transaction.
    pub async fn save_snapshot(
        &self,
        kind: ItemKind,
        container: &str,
        side: Side,
        entries: &[SnapshotEntry],
    ) -> Result<(), StateError> {
        self.save_snapshots(kind, &[(container, side, entries)]).await
    }

    /// Replaces the snapshot of every listed `(container, side)` in a single
    /// transaction: all of them advance or none do.
    pub async fn save_snapshots(
        &self,
        kind: ItemKind,
        sides: &[(&str, Side, &[SnapshotEntry])],
    ) -> Result<(), StateError> {
        let taken_at = OffsetDateTime::now_utc().unix_timestamp();
        let mut tx = self.pool.begin().await?;
        for &(container, side, entries) in sides {
            write_side(&mut tx, kind, container, side, entries, taken_at).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// `None` when no pass ever completed for this container side.
    pub async fn load_snapshot(
        &self,
        kind: ItemKind,
        container: &str,
        side: Side,
    ) -> Result<Option<Vec<SnapshotEntry>>, StateError> {
        let marker = sqlx::query(
            "SELECT taken_at FROM snapshots WHERE kind = ?1 AND container_key = ?2 AND side = ?3",
        )
        .bind(kind.as_str())
        .bind(container)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if marker.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT item_identity, item_display_name
             FROM snapshot_items
             WHERE kind = ?1 AND container_key = ?2 AND side = ?3
             ORDER BY id ASC",
        )
        .bind(kind.as_str())
        .bind(container)
        .bind(side.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SnapshotEntry {
                identity: row.try_get("item_identity")?,
                display_name: row.try_get("item_display_name")?,
            });
        }
        Ok(Some(out))
    }

    pub async fn clear_snapshot(
        &self,
        kind: ItemKind,
        container: &str,
        side: Side,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM snapshot_items WHERE kind = ?1 AND container_key = ?2 AND side = ?3",
        )
        .bind(kind.as_str())
        .bind(container)
        .bind(side.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM snapshots WHERE kind = ?1 AND container_key = ?2 AND side = ?3")
            .bind(kind.as_str())
            .bind(container)
            .bind(side.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn write_side(
    tx: &mut Transaction<'_, Sqlite>,
    kind: ItemKind,
    container: &str,
    side: Side,
    entries: &[SnapshotEntry],
    taken_at: i64,
) -> Result<(), StateError> {
    sqlx::query("DELETE FROM snapshot_items WHERE kind = ?1 AND container_key = ?2 AND side = ?3")
        .bind(kind.as_str())
        .bind(container)
        .bind(side.as_str())
        .execute(&mut **tx)
        .await?;

    for entry in entries {
        sqlx::query(
            "INSERT INTO snapshot_items (kind, container_key, side, item_identity, item_display_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(kind.as_str())
        .bind(container)
        .bind(side.as_str())
        .bind(&entry.identity)
        .bind(&entry.display_name)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO snapshots (kind, container_key, side, taken_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(kind, container_key, side) DO UPDATE SET taken_at = excluded.taken_at",
    )
    .bind(kind.as_str())
    .bind(container)
    .bind(side.as_str())
    .bind(taken_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
