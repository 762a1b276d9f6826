use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::llm::{LlmProvider, OpenAiClient};
use crate::retell::RetellClient;
use crate::shared::utils::DbPool;
use crate::telegram::{new_sessions, TelegramClient, TelegramSessions};

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub llm: Arc<dyn LlmProvider>,
    pub retell: RetellClient,
    pub telegram: TelegramClient,
    pub telegram_sessions: TelegramSessions,
    pub response_cache: ResponseCache,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig) -> Self {
        let llm = Arc::new(OpenAiClient::new(&config.openai));
        let retell = RetellClient::new(&config.retell);
        let telegram = TelegramClient::new(&config.telegram);
        let response_cache = ResponseCache::new(
            Duration::from_secs(config.cache.ttl_seconds),
            config.cache.max_entries,
        );
        Self {
            conn,
            config,
            llm,
            retell,
            telegram,
            telegram_sessions: new_sessions(),
            response_cache,
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            llm: Arc::clone(&self.llm),
            retell: self.retell.clone(),
            telegram: self.telegram.clone(),
            telegram_sessions: Arc::clone(&self.telegram_sessions),
            response_cache: self.response_cache.clone(),
        }
    }
}
