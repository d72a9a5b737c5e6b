//! SqlExecutor that records statements instead of talking to a database.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{SqlError, SqlExecutor};

#[derive(Clone, Default)]
pub struct RecordingSqlExecutor {
    executed: Arc<Mutex<Vec<String>>>,
    fail_on: Option<Arc<str>>,
}

impl RecordingSqlExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `needle` fail instead of being recorded.
    pub fn failing_on(needle: &str) -> Self {
        Self {
            executed: Arc::default(),
            fail_on: Some(Arc::from(needle)),
        }
    }

    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl SqlExecutor for RecordingSqlExecutor {
    async fn execute(&self, statement: &str) -> Result<u64, SqlError> {
        if let Some(needle) = &self.fail_on
            && statement.contains(&**needle)
        {
            return Err(SqlError(format!("syntax error near {needle}")));
        }
        self.executed.lock().await.push(statement.to_string());
        Ok(0)
    }
}
