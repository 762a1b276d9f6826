use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub openai: OpenAiConfig,
    pub retell: RetellConfig,
    pub telegram: TelegramConfig,
    pub cache: CacheSettings,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct RetellConfig {
    pub api_key: String,
    pub base_url: String,
    pub from_number: String,
    pub agent_id: String,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env_or("SERVER_PORT", "8080")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid SERVER_PORT: {e}"))?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port,
            },
            database: DatabaseConfig {
                url: env_or(
                    "DATABASE_URL",
                    "postgres://crm:@localhost:5432/crmserver",
                ),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET")
                    .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
                token_ttl_hours: env_or("TOKEN_TTL_HOURS", "24").parse().unwrap_or(24),
            },
            openai: OpenAiConfig {
                api_key: env_or("OPENAI_API_KEY", ""),
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            },
            retell: RetellConfig {
                api_key: env_or("RETELL_API_KEY", ""),
                base_url: env_or("RETELL_BASE_URL", "https://api.retellai.com"),
                from_number: env_or("RETELL_FROM_NUMBER", ""),
                agent_id: env_or("RETELL_AGENT_ID", ""),
            },
            telegram: TelegramConfig {
                bot_token: env_or("TELEGRAM_BOT_TOKEN", ""),
                base_url: env_or("TELEGRAM_API_URL", "https://api.telegram.org"),
            },
            cache: CacheSettings {
                ttl_seconds: env_or("CACHE_TTL_SECONDS", "30").parse().unwrap_or(30),
                max_entries: env_or("CACHE_MAX_ENTRIES", "1000").parse().unwrap_or(1000),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
