use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::forecast::{MinMaxScaler, ModelArtifact, ModelInfo};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS forecast_models (
    symbol      TEXT PRIMARY KEY,
    model       BLOB NOT NULL,
    scaler      TEXT NOT NULL,
    window_len  INTEGER NOT NULL,
    final_loss  REAL NOT NULL,
    trained_at  TEXT NOT NULL
);
"#;

/// Open (or create) the database at `path` and ensure the schema exists.
pub fn initialize_database(path: &str) -> Result<Connection, AppError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

/// In-memory database with the schema applied.
pub fn initialize_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

// ── Model artifacts ──

/// Insert or replace the artifact for its symbol. Last writer wins.
pub fn save_model<R: Serialize>(conn: &Connection, artifact: &ModelArtifact<R>) -> Result<(), AppError> {
    let model = bincode::serialize(&artifact.model)?;
    let scaler = serde_json::to_string(&artifact.scaler)?;
    conn.execute(
        "INSERT OR REPLACE INTO forecast_models (symbol, model, scaler, window_len, final_loss, trained_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            artifact.symbol,
            model,
            scaler,
            artifact.window as i64,
            artifact.final_loss,
            artifact.trained_at,
        ],
    )?;
    info!("Saved model for {} ({} bytes)", artifact.symbol, model.len());
    Ok(())
}

/// Load the artifact for `symbol`; `None` on a miss.
pub fn load_model<R: DeserializeOwned>(
    conn: &Connection,
    symbol: &str,
) -> Result<Option<ModelArtifact<R>>, AppError> {
    let row = conn
        .query_row(
            "SELECT model, scaler, window_len, final_loss, trained_at
             FROM forecast_models WHERE symbol = ?1",
            params![symbol],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((blob, scaler_json, window, final_loss, trained_at)) = row else {
        return Ok(None);
    };

    let model: R = bincode::deserialize(&blob)
        .map_err(|e| AppError::ModelArtifact(format!("corrupt model for {}: {}", symbol, e)))?;
    let scaler: MinMaxScaler = serde_json::from_str(&scaler_json)?;

    Ok(Some(ModelArtifact {
        symbol: symbol.to_string(),
        model,
        scaler,
        window: window as usize,
        final_loss,
        trained_at,
    }))
}

/// Delete a symbol's model. Returns whether a row was removed.
pub fn delete_model(conn: &Connection, symbol: &str) -> Result<bool, AppError> {
    let affected = conn.execute("DELETE FROM forecast_models WHERE symbol = ?1", params![symbol])?;
    Ok(affected > 0)
}

/// All cached models, ordered by symbol.
pub fn list_models(conn: &Connection) -> Result<Vec<ModelInfo>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT symbol, window_len, final_loss, trained_at FROM forecast_models ORDER BY symbol",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ModelInfo {
            symbol: row.get(0)?,
            window: row.get::<_, i64>(1)? as usize,
            final_loss: row.get(2)?,
            trained_at: row.get(3)?,
        })
    })?;

    let mut models = Vec::new();
    for row in rows {
        models.push(row?);
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(symbol: &str, weights: Vec<f64>) -> ModelArtifact<Vec<f64>> {
        ModelArtifact {
            symbol: symbol.to_string(),
            model: weights,
            scaler: MinMaxScaler { min: 10.0, max: 20.0 },
            window: 60,
            final_loss: 0.0125,
            trained_at: "2024-06-01 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_save_and_load_model() {
        let conn = initialize_in_memory().unwrap();
        save_model(&conn, &artifact("AAPL", vec![0.1, 0.2, 0.3])).unwrap();

        let loaded: ModelArtifact<Vec<f64>> = load_model(&conn, "AAPL").unwrap().unwrap();
        assert_eq!(loaded.model, vec![0.1, 0.2, 0.3]);
        assert_eq!(loaded.scaler, MinMaxScaler { min: 10.0, max: 20.0 });
        assert_eq!(loaded.window, 60);
        assert_eq!(loaded.final_loss, 0.0125);
    }

    #[test]
    fn test_load_missing_model() {
        let conn = initialize_in_memory().unwrap();
        let loaded: Option<ModelArtifact<Vec<f64>>> = load_model(&conn, "NONE").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let conn = initialize_in_memory().unwrap();
        save_model(&conn, &artifact("AAPL", vec![1.0])).unwrap();
        save_model(&conn, &artifact("AAPL", vec![2.0])).unwrap();
        let loaded: ModelArtifact<Vec<f64>> = load_model(&conn, "AAPL").unwrap().unwrap();
        assert_eq!(loaded.model, vec![2.0]);
        assert_eq!(list_models(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_list_and_delete() {
        let conn = initialize_in_memory().unwrap();
        save_model(&conn, &artifact("TSLA", vec![1.0])).unwrap();
        save_model(&conn, &artifact("AAPL", vec![1.0])).unwrap();

        let symbols: Vec<String> = list_models(&conn).unwrap().into_iter().map(|m| m.symbol).collect();
        assert_eq!(symbols, vec!["AAPL".to_string(), "TSLA".to_string()]);

        assert!(delete_model(&conn, "AAPL").unwrap());
        assert!(!delete_model(&conn, "AAPL").unwrap());
        assert_eq!(list_models(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_blob_is_artifact_error() {
        let conn = initialize_in_memory().unwrap();
        conn.execute(
            "INSERT INTO forecast_models VALUES ('BAD', x'01', '{\"min\":0.0,\"max\":1.0}', 60, 0.0, '')",
            [],
        )
        .unwrap();
        let err = load_model::<Vec<f64>>(&conn, "BAD").unwrap_err();
        assert!(matches!(err, AppError::ModelArtifact(_)));
    }
}
