use std::path::PathBuf;

/// Process-level configuration, read once from the environment at startup.
///
/// Missing values degrade features instead of aborting: no agent URL means
/// runs fail with a recorded error, no GitHub App credentials means the
/// GitHub provider is never offered to the agent.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent_url: Option<String>,
    pub assistant_id: String,
    pub github_app_id: Option<String>,
    pub github_private_key: Option<String>,
    pub db_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub internal_token: String,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = env_nonempty("OPSWATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".opswatch")
                    .join("opswatch.db")
            });

        Self {
            agent_url: env_nonempty("OPSWATCH_AGENT_URL"),
            assistant_id: env_nonempty("OPSWATCH_ASSISTANT_ID")
                .unwrap_or_else(|| "investigation".to_string()),
            github_app_id: env_nonempty("GITHUB_APP_ID"),
            github_private_key: env_nonempty("GITHUB_APP_PRIVATE_KEY"),
            db_path,
            api_host: env_nonempty("OPSWATCH_API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port: env_nonempty("OPSWATCH_API_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(7070),
            internal_token: env_nonempty("OPSWATCH_INTERNAL_TOKEN")
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }
    }
}
