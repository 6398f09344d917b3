//! Configuration types.
//!
//! Two structs, two lifetimes:
//!
//! * [`RenderConfig`]: per-request knobs for the placeholder pipeline and the
//!   remote conversion (delimiters, ignorable prefix, formatting policy,
//!   output format, sanity thresholds). Built via [`RenderConfigBuilder`] so
//!   callers set only what they care about and rely on documented defaults
//!   for the rest.
//! * [`AppSettings`]: per-installation identity: the application (client)
//!   id registered with Microsoft identity, the tenant, and how to sign in.
//!   Loaded from an optional TOML file and then from the environment; a
//!   variable exported in the shell always wins over the file.

use crate::document::RunStyle;
use crate::error::RecoverletteError;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Colour forced onto replaced text under [`FormattingPolicy::Normalize`].
pub const NORMALIZED_COLOR: &str = "000000";

/// Prefix marking placeholders that may be silently dropped when undefined.
pub const DEFAULT_IGNORABLE_PREFIX: &str = "ADDL_";

/// Per-request configuration.
///
/// # Example
/// ```rust
/// use recoverlette::{FormattingPolicy, OutputFormat, RenderConfig};
///
/// let config = RenderConfig::builder()
///     .formatting(FormattingPolicy::normalized())
///     .output_format(OutputFormat::Pdf)
///     .settle_delay_ms(0)
///     .build()
///     .unwrap();
/// assert_eq!(config.ignorable_prefix.as_deref(), Some("ADDL_"));
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Token delimiters. Default: `{{` / `}}`.
    pub delimiters: Delimiters,

    /// Keys starting with this prefix are deleted rather than reported when
    /// they have no binding. `None` makes every unbound key required.
    /// Default: `ADDL_`.
    pub ignorable_prefix: Option<String>,

    /// Styling applied to replaced text. Default: [`FormattingPolicy::Inherit`].
    pub formatting: FormattingPolicy,

    /// Format requested from the remote converter. Default: PDF.
    pub output_format: OutputFormat,

    /// Rendered artifacts smaller than this are treated as error pages and
    /// never written. Default: 1000 bytes.
    pub min_output_bytes: usize,

    /// Pause between uploading the temporary copy and requesting conversion,
    /// in milliseconds. Default: 5000.
    ///
    /// The conversion endpoint can answer with a stale or missing item if it
    /// is hit immediately after the upload commits.
    pub settle_delay_ms: u64,

    /// Per-request transport timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// What to do when required placeholders have no binding. Default: warn.
    pub undefined_gate: UndefinedGate,

    /// Also write the filled `.docx` locally before it is uploaded.
    pub save_filled_docx: Option<PathBuf>,

    /// Optional stage-level progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            ignorable_prefix: Some(DEFAULT_IGNORABLE_PREFIX.to_string()),
            formatting: FormattingPolicy::default(),
            output_format: OutputFormat::default(),
            min_output_bytes: 1000,
            settle_delay_ms: 5000,
            request_timeout_secs: 120,
            undefined_gate: UndefinedGate::default(),
            save_filled_docx: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("delimiters", &self.delimiters)
            .field("ignorable_prefix", &self.ignorable_prefix)
            .field("formatting", &self.formatting)
            .field("output_format", &self.output_format)
            .field("min_output_bytes", &self.min_output_bytes)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("undefined_gate", &self.undefined_gate)
            .field("save_filled_docx", &self.save_filled_docx)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn delimiters(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.config.delimiters = Delimiters {
            open: open.into(),
            close: close.into(),
        };
        self
    }

    pub fn ignorable_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.ignorable_prefix = Some(prefix.into());
        self
    }

    pub fn no_ignorable_prefix(mut self) -> Self {
        self.config.ignorable_prefix = None;
        self
    }

    pub fn formatting(mut self, policy: FormattingPolicy) -> Self {
        self.config.formatting = policy;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn min_output_bytes(mut self, n: usize) -> Self {
        self.config.min_output_bytes = n;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn undefined_gate(mut self, gate: UndefinedGate) -> Self {
        self.config.undefined_gate = gate;
        self
    }

    pub fn save_filled_docx(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.save_filled_docx = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, RecoverletteError> {
        let c = &self.config;
        if c.delimiters.open.is_empty() || c.delimiters.close.is_empty() {
            return Err(RecoverletteError::InvalidConfig(
                "placeholder delimiters must not be empty".into(),
            ));
        }
        if c.ignorable_prefix.as_deref() == Some("") {
            return Err(RecoverletteError::InvalidConfig(
                "ignorable prefix must not be empty (use no_ignorable_prefix)".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(RecoverletteError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

static DEFAULT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").unwrap());

/// Open/close markers around a placeholder key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "{{".to_string(),
            close: "}}".to_string(),
        }
    }
}

impl Delimiters {
    /// Non-greedy matcher: the first close marker after an open marker ends
    /// the token. Capture group 1 is the raw key.
    pub fn pattern(&self) -> Regex {
        if self.open == "{{" && self.close == "}}" {
            return DEFAULT_PATTERN.clone();
        }
        let source = format!(
            "{}(.*?){}",
            regex::escape(&self.open),
            regex::escape(&self.close)
        );
        // Both halves are escaped literals, so the pattern always compiles.
        Regex::new(&source).unwrap_or_else(|_| unreachable!("escaped delimiter pattern"))
    }

    /// Render `key` wrapped in these delimiters.
    pub fn wrap(&self, key: &str) -> String {
        format!("{}{}{}", self.open, key, self.close)
    }
}

/// How replaced text is styled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormattingPolicy {
    /// The replacement takes the exact style of the first run of the
    /// placeholder span. (default)
    #[default]
    Inherit,
    /// The replacement takes `baseline` with its colour forced to
    /// [`NORMALIZED_COLOR`], whatever ad hoc formatting the placeholder had.
    Normalize { baseline: RunStyle },
}

impl FormattingPolicy {
    /// Normalize onto an empty baseline (paragraph style + black text).
    pub fn normalized() -> Self {
        FormattingPolicy::Normalize {
            baseline: RunStyle::default(),
        }
    }

    /// Style for a replacement whose span started in a run styled `original`.
    pub fn style_for(&self, original: &RunStyle) -> RunStyle {
        match self {
            FormattingPolicy::Inherit => original.clone(),
            FormattingPolicy::Normalize { baseline } => RunStyle {
                color: Some(NORMALIZED_COLOR.to_string()),
                ..baseline.detached()
            },
        }
    }
}

/// Target format for the remote converter.
///
/// The variants are the `format` tokens the Graph content endpoint accepts.
/// Not every account tier supports every token; an unsupported one surfaces
/// as [`crate::remote::DriveError::FormatNotSupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    Html,
    Jpg,
    Glb,
}

impl OutputFormat {
    /// Query-string token sent to the converter.
    pub fn token(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html => "html",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Glb => "glb",
        }
    }

    /// Leading bytes every valid artifact of this format starts with.
    pub fn magic(self) -> Option<&'static [u8]> {
        match self {
            OutputFormat::Pdf => Some(b"%PDF"),
            OutputFormat::Jpg => Some(&[0xFF, 0xD8, 0xFF]),
            OutputFormat::Glb => Some(b"glTF"),
            OutputFormat::Html => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for OutputFormat {
    type Err = RecoverletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "html" => Ok(OutputFormat::Html),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "glb" => Ok(OutputFormat::Glb),
            other => Err(RecoverletteError::InvalidConfig(format!(
                "unknown output format '{other}' (expected pdf, html, jpg or glb)"
            ))),
        }
    }
}

/// Called with the sorted list of unbound required keys; `true` proceeds.
pub type ConfirmCallback = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Policy for required placeholders that have no binding.
#[derive(Clone, Default)]
pub enum UndefinedGate {
    /// Log a warning and leave the tokens verbatim. (default)
    #[default]
    Warn,
    /// Abort before any remote call.
    Deny,
    /// Ask the callback; abort before any remote call if it declines.
    Confirm(ConfirmCallback),
}

impl fmt::Debug for UndefinedGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndefinedGate::Warn => f.write_str("Warn"),
            UndefinedGate::Deny => f.write_str("Deny"),
            UndefinedGate::Confirm(_) => f.write_str("Confirm(<callback>)"),
        }
    }
}

// ── Application settings ─────────────────────────────────────────────────

pub const ENV_CLIENT_ID: &str = "RECOVERLETTE_CLIENT_ID";
pub const ENV_TENANT_ID: &str = "RECOVERLETTE_TENANT_ID";
pub const ENV_AUTH_FLOW: &str = "RECOVERLETTE_AUTH_FLOW";
pub const ENV_GRAPH_URL: &str = "RECOVERLETTE_GRAPH_URL";
pub const ENV_AUTHORITY_URL: &str = "RECOVERLETTE_AUTHORITY_URL";
pub const ENV_ACCESS_TOKEN: &str = "RECOVERLETTE_ACCESS_TOKEN";
pub const ENV_NO_CACHE: &str = "RECOVERLETTE_NO_CACHE";

pub const DEFAULT_TENANT: &str = "consumers";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

const CONFIG_FILE_NAME: &str = "recoverlette.toml";

/// How the credential provider obtains a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthFlow {
    /// Authorization code + PKCE through the system browser. (default)
    #[default]
    Browser,
    /// Device authorization grant: a code is shown, sign-in happens elsewhere.
    DeviceCode,
    /// A pre-issued bearer token from [`AppSettings::access_token`].
    Token,
}

impl FromStr for AuthFlow {
    type Err = RecoverletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "interactive" => Ok(AuthFlow::Browser),
            "device-code" | "device" | "devicecode" => Ok(AuthFlow::DeviceCode),
            "token" => Ok(AuthFlow::Token),
            other => Err(RecoverletteError::InvalidConfig(format!(
                "unknown auth flow '{other}' (expected browser, device-code or token)"
            ))),
        }
    }
}

/// Installation-level identity and endpoints.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppSettings {
    /// Application (client) id registered with Microsoft identity.
    pub client_id: Option<String>,
    /// Tenant / realm. Default: `consumers` (personal Microsoft accounts).
    pub tenant_id: String,
    pub auth_flow: AuthFlow,
    pub graph_url: String,
    pub authority_url: String,
    /// Pre-issued bearer token; when present it is used instead of any
    /// interactive flow.
    pub access_token: Option<String>,
    /// Persist tokens between runs. Default: true.
    pub token_cache: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            auth_flow: AuthFlow::default(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            access_token: None,
            token_cache: true,
        }
    }
}

impl fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSettings")
            .field("client_id", &self.redacted_client_id())
            .field("tenant_id", &self.tenant_id)
            .field("auth_flow", &self.auth_flow)
            .field("graph_url", &self.graph_url)
            .field("authority_url", &self.authority_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("token_cache", &self.token_cache)
            .finish()
    }
}

impl AppSettings {
    /// Load settings: config file first, then the process environment on top.
    ///
    /// The file is `explicit` if given (it must exist), otherwise the first of
    /// `./recoverlette.toml` and `<config dir>/recoverlette/config.toml` that
    /// exists. No file at all is fine.
    pub fn load(explicit: Option<&Path>) -> Result<Self, RecoverletteError> {
        let mut settings = match Self::locate_file(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn locate_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("recoverlette").join("config.toml"))
            .filter(|p| p.is_file())
    }

    /// Parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self, RecoverletteError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RecoverletteError::InvalidConfig(format!(
                "cannot read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&raw).map_err(|e| match e {
            RecoverletteError::InvalidConfig(msg) => {
                RecoverletteError::InvalidConfig(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, RecoverletteError> {
        toml::from_str(raw).map_err(|e| RecoverletteError::InvalidConfig(e.to_string()))
    }

    /// Overlay variables from `lookup`; unset or empty variables keep the
    /// current value.
    ///
    /// # Errors
    /// [`RecoverletteError::InvalidConfig`] naming the variable when
    /// `RECOVERLETTE_AUTH_FLOW` is not a known flow.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), RecoverletteError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = get(ENV_TENANT_ID) {
            self.tenant_id = v;
        }
        if let Some(v) = get(ENV_AUTH_FLOW) {
            self.auth_flow = v.parse().map_err(|e| match e {
                RecoverletteError::InvalidConfig(msg) => {
                    RecoverletteError::InvalidConfig(format!("{ENV_AUTH_FLOW}: {msg}"))
                }
                other => other,
            })?;
        }
        if let Some(v) = get(ENV_GRAPH_URL) {
            self.graph_url = v;
        }
        if let Some(v) = get(ENV_AUTHORITY_URL) {
            self.authority_url = v;
        }
        if let Some(v) = get(ENV_ACCESS_TOKEN) {
            self.access_token = Some(v);
        }
        if let Some(v) = get(ENV_NO_CACHE) {
            self.token_cache = matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        Ok(())
    }

    /// Check that an interactive flow has a client id to sign in with.
    pub fn validate(&self) -> Result<(), RecoverletteError> {
        if self.access_token.is_some() {
            return Ok(());
        }
        if self.auth_flow == AuthFlow::Token {
            return Err(RecoverletteError::InvalidConfig(format!(
                "auth flow 'token' needs {ENV_ACCESS_TOKEN}"
            )));
        }
        if self.client_id.as_deref().is_none_or(str::is_empty) {
            return Err(RecoverletteError::InvalidConfig(format!(
                "{ENV_CLIENT_ID} is not set (environment or {CONFIG_FILE_NAME})"
            )));
        }
        Ok(())
    }

    /// Client id safe for logs: `***` plus the last four characters.
    pub fn redacted_client_id(&self) -> String {
        match &self.client_id {
            Some(id) => {
                let tail: String = id
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("***{tail}")
            }
            None => "<unset>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn builder_defaults() {
        let c = RenderConfig::builder().build().unwrap();
        assert_eq!(c.delimiters, Delimiters::default());
        assert_eq!(c.ignorable_prefix.as_deref(), Some("ADDL_"));
        assert_eq!(c.formatting, FormattingPolicy::Inherit);
        assert_eq!(c.output_format, OutputFormat::Pdf);
        assert_eq!(c.min_output_bytes, 1000);
        assert!(matches!(c.undefined_gate, UndefinedGate::Warn));
    }

    #[test]
    fn builder_rejects_empty_delimiters_and_prefix() {
        assert!(RenderConfig::builder().delimiters("", "]]").build().is_err());
        assert!(RenderConfig::builder().ignorable_prefix("").build().is_err());
        assert!(RenderConfig::builder().request_timeout_secs(0).build().is_err());
        assert!(RenderConfig::builder().no_ignorable_prefix().build().is_ok());
    }

    #[test]
    fn delimiter_pattern_is_non_greedy_and_escaped() {
        let d = Delimiters {
            open: "[[".into(),
            close: "]]".into(),
        };
        let keys: Vec<&str> = d
            .pattern()
            .captures_iter("[[A]] and [[B]]")
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(d.wrap("KEY"), "[[KEY]]");
    }

    #[test]
    fn normalize_forces_colour_and_drops_source() {
        let original = RunStyle {
            color: Some("FF0000".into()),
            bold: true,
            source: Some("<w:rPr/>".into()),
            ..RunStyle::default()
        };
        let baseline = RunStyle {
            font: Some("Calibri".into()),
            color: Some("00FF00".into()),
            ..RunStyle::default()
        };
        let style = FormattingPolicy::Normalize { baseline }.style_for(&original);
        assert_eq!(style.color.as_deref(), Some(NORMALIZED_COLOR));
        assert_eq!(style.font.as_deref(), Some("Calibri"));
        assert!(!style.bold);
        assert!(style.source.is_none());

        assert_eq!(FormattingPolicy::Inherit.style_for(&original), original);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("PDF".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpg);
        assert!("docx".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Pdf.magic(), Some(&b"%PDF"[..]));
    }

    #[test]
    fn environment_wins_over_file() {
        let mut s = AppSettings::from_toml(
            r#"
            client-id = "file-client"
            tenant-id = "organizations"
            auth-flow = "device-code"
            "#,
        )
        .unwrap();
        assert_eq!(s.auth_flow, AuthFlow::DeviceCode);

        s.apply_env(env(&[
            (ENV_CLIENT_ID, "env-client"),
            (ENV_TENANT_ID, ""),
            (ENV_NO_CACHE, "1"),
        ]))
        .unwrap();
        assert_eq!(s.client_id.as_deref(), Some("env-client"));
        // empty variable does not clobber the file value
        assert_eq!(s.tenant_id, "organizations");
        assert!(!s.token_cache);
    }

    #[test]
    fn unknown_auth_flow_in_environment_is_rejected() {
        let mut s = AppSettings::default();
        let err = s
            .apply_env(env(&[(ENV_AUTH_FLOW, "devicecod")]))
            .unwrap_err();
        assert!(matches!(err, RecoverletteError::InvalidConfig(_)));
        assert!(err.to_string().contains(ENV_AUTH_FLOW), "got: {err}");
        assert!(err.to_string().contains("devicecod"), "got: {err}");

        s.apply_env(env(&[(ENV_AUTH_FLOW, "device-code")])).unwrap();
        assert_eq!(s.auth_flow, AuthFlow::DeviceCode);
    }

    #[test]
    fn defaults_match_personal_accounts() {
        let mut s = AppSettings::default();
        s.apply_env(env(&[])).unwrap();
        assert_eq!(s.tenant_id, DEFAULT_TENANT);
        assert_eq!(s.graph_url, DEFAULT_GRAPH_URL);
        assert!(s.token_cache);
    }

    #[test]
    fn validate_requires_client_id_for_interactive_flows() {
        let s = AppSettings::default();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_ID), "got: {err}");

        let token_only = AppSettings {
            access_token: Some("eyJ".into()),
            ..AppSettings::default()
        };
        assert!(token_only.validate().is_ok());
    }

    #[test]
    fn client_id_is_redacted_in_debug() {
        let s = AppSettings {
            client_id: Some("0000-1111-2222-abcd".into()),
            access_token: Some("secret".into()),
            ..AppSettings::default()
        };
        let dbg = format!("{s:?}");
        assert!(dbg.contains("***abcd"));
        assert!(!dbg.contains("0000-1111"));
        assert!(!dbg.contains("secret"));
    }
}
