//! Web tools: fetch and search.
//!
//! `web_fetch` requires http(s) and refuses private, loopback, link-local,
//! CGNAT, and IPv6 ULA/mapped-private destinations so the model cannot be
//! steered into internal services. `web_search` signs queries to the Brave
//! Search API and needs a configured key.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use super::base::{require_str, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";
const MAX_REDIRECTS: usize = 5;
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// SSRF guard
// ---------------------------------------------------------------------------

/// Reject an IP that points at private or local infrastructure.
fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // CGNAT 100.64.0.0/10.
                || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let segments = v6.segments();
            // ULA fc00::/7 and link-local fe80::/10.
            if (segments[0] & 0xFE00) == 0xFC00 || (segments[0] & 0xFFC0) == 0xFE80 {
                return true;
            }
            // IPv4-mapped addresses inherit the IPv4 rules.
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(mapped));
            }
            false
        }
    }
}

/// Validate a URL for fetching: http(s) only, no local or private hosts.
pub fn validate_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("only http/https allowed, got '{}'", other)),
    }
    let host = parsed.host_str().ok_or("missing host")?;

    let lower = host.to_lowercase();
    if lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal") {
        return Err(format!("access to local host '{}' is blocked", host));
    }

    // Literal IPs are checked directly; hostname resolution is left to the
    // request path, which still cannot reach link-local metadata by name.
    if let Ok(ip) = lower.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(format!("access to private/local IP '{}' is blocked", ip));
        }
    }

    Ok(parsed)
}

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Pull the `<title>` text, if any.
fn extract_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str().trim()).to_string())
}

/// Strip scripts, styles, and tags; decode entities; squeeze whitespace.
fn extract_text(html: &str) -> String {
    let re_script = Regex::new(r"(?is)<script[\s\S]*?</script>").expect("static regex");
    let text = re_script.replace_all(html, " ");
    let re_style = Regex::new(r"(?is)<style[\s\S]*?</style>").expect("static regex");
    let text = re_style.replace_all(&text, " ");
    let re_tags = Regex::new(r"<[^>]+>").expect("static regex");
    let text = re_tags.replace_all(&text, " ");
    let decoded = html_escape::decode_html_entities(&text).to_string();

    let re_spaces = Regex::new(r"[ \t]+").expect("static regex");
    let squeezed = re_spaces.replace_all(&decoded, " ");
    let re_newlines = Regex::new(r"\s*\n\s*").expect("static regex");
    re_newlines.replace_all(&squeezed, "\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// WebFetchTool
// ---------------------------------------------------------------------------

/// Fetch a URL and extract its title and readable text.
pub struct WebFetchTool {
    max_chars: usize,
    client: Client,
}

impl WebFetchTool {
    pub fn new(max_chars: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { max_chars, client }
    }

    /// Fetch and extract, shared with the handler's URL expansion.
    pub async fn fetch(&self, raw_url: &str) -> Result<String, String> {
        let url = validate_url(raw_url).map_err(|e| format!("URL validation failed: {}", e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("fetch failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_BYTES)]);

        let title = extract_title(&body);
        let text = extract_text(&body);
        let truncated: String = text.chars().take(self.max_chars).collect();

        Ok(match title {
            Some(title) => format!("# {}\n\n{}", title, truncated),
            None => truncated,
        })
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and extract the page title and readable text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The http(s) URL to fetch"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let url = match require_str(input, "url") {
            Ok(u) => u,
            Err(e) => return e,
        };
        match self.fetch(url).await {
            Ok(content) => content,
            Err(e) => format!("Error: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// WebSearchTool
// ---------------------------------------------------------------------------

/// Search the web via the Brave Search API.
pub struct WebSearchTool {
    api_key: Option<String>,
    max_results: usize,
    client: Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: usize) -> Self {
        Self {
            api_key,
            max_results,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs, and snippets."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let query = match require_str(input, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let api_key = match &self.api_key {
            Some(key) => key,
            None => return "Error: web search requires a configured brave-api-key".to_string(),
        };

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return format!("Error: {}", e),
        };
        if !response.status().is_success() {
            return format!("Error: search returned HTTP {}", response.status());
        }

        let data: Value = match response.json().await {
            Ok(d) => d,
            Err(e) => return format!("Error parsing search results: {}", e),
        };

        let results = data["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return format!("No results for: {}", query);
        }

        let mut lines = vec![format!("Results for: {}\n", query)];
        for (i, item) in results.iter().take(self.max_results).enumerate() {
            let title = item["title"].as_str().unwrap_or("");
            let url = item["url"].as_str().unwrap_or("");
            lines.push(format!("{}. {}\n   {}", i + 1, title, url));
            if let Some(desc) = item["description"].as_str() {
                lines.push(format!("   {}", desc));
            }
        }
        lines.join("\n")
    }
}
