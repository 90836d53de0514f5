/// Canonical column names used as keys in extracted rows.
/// These stay stable regardless of how the upstream page labels its headers.
pub const TEAM_COLUMN: &str = "team";
pub const SEASON_COLUMN: &str = "season";
pub const POINTS_ALLOWED_COLUMN: &str = "points_allowed";
pub const SACKS_COLUMN: &str = "sacks";
pub const INTERCEPTIONS_COLUMN: &str = "interceptions";

/// Columns the extractor must find for a table to be complete.
pub const REQUIRED_COLUMNS: [&str; 4] = [
    TEAM_COLUMN,
    POINTS_ALLOWED_COLUMN,
    SACKS_COLUMN,
    INTERCEPTIONS_COLUMN,
];

pub const DEFAULT_USER_AGENT: &str =
    "defense_scraper/0.1 (season team-defense totals for fantasy research; one request every few seconds)";

// Fetch policy defaults
pub const DEFAULT_CRAWL_DELAY_MS: u64 = 3_000;
pub const MIN_CRAWL_DELAY_MS: u64 = 2_000;
pub const MAX_CRAWL_DELAY_MS: u64 = 5_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS_CAP: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 120;

// Multiplier clamp defaults
pub const DEFAULT_MIN_MULTIPLIER: f64 = 0.25;
pub const DEFAULT_MAX_MULTIPLIER: f64 = 4.0;

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Header labels accepted for each canonical column, compared case-insensitively.
pub fn default_team_headers() -> Vec<String> {
    vec!["Team".into(), "Tm".into()]
}

pub fn default_season_headers() -> Vec<String> {
    vec!["Season".into(), "Year".into()]
}

pub fn default_points_allowed_headers() -> Vec<String> {
    vec!["Points Allowed".into(), "PA".into()]
}

pub fn default_sacks_headers() -> Vec<String> {
    vec!["Sacks".into(), "Sk".into()]
}

pub fn default_interceptions_headers() -> Vec<String> {
    vec!["Interceptions".into(), "Int".into()]
}

/// Summary rows that some stats sites append to team tables.
pub fn default_skip_row_labels() -> Vec<String> {
    vec![
        "Avg Team".into(),
        "League Total".into(),
        "Avg Tm/G".into(),
    ]
}
