//! Browser-rendered adapter: dumps a search page's DOM with headless Chromium
//! and reads listing cards out of it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jobsweep_core::{BrowserCard, RawResult, SearchTask};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::{render_template, AdapterError, AdapterVariant, SourceAdapter};

/// Chromium instances are heavy; keep at most this many alive.
const MAX_CONCURRENT_BROWSERS: usize = 1;

const CARD_SELECTORS: &[&str] = &["[data-job-id]", ".base-card", ".job-search-card"];
const TITLE_SELECTORS: &[&str] = &["h3 a", ".base-search-card__title", "h3"];
const COMPANY_SELECTORS: &[&str] = &["h4 a", ".base-search-card__subtitle", "h4"];
const LOCATION_SELECTORS: &[&str] = &[
    "[data-test-id='job-search-card-location']",
    ".job-search-card__location",
];
const LINK_SELECTORS: &[&str] = &["a.base-card__full-link", "h3 a", "a[href]"];
const DESCRIPTION_SELECTORS: &[&str] = &[
    ".jobs-box__html-content",
    ".jobs-description-content__text",
    ".jobs-description__content",
    "[data-test-id='job-details-description']",
    ".job-search-card__snippet",
];

pub struct BrowserSourceAdapter {
    chrome_bin: String,
    url_templates: BTreeMap<String, String>,
    render_timeout: Duration,
    slots: Semaphore,
}

impl BrowserSourceAdapter {
    /// `url_templates` maps a source name to its search page URL, with
    /// `{term}`, `{location}`, `{hours}` and `{seconds}` placeholders.
    pub fn new(
        chrome_bin: impl Into<String>,
        url_templates: BTreeMap<String, String>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            chrome_bin: chrome_bin.into(),
            url_templates,
            render_timeout,
            slots: Semaphore::new(MAX_CONCURRENT_BROWSERS),
        }
    }

    async fn dump_dom(&self, url: &str) -> Result<String, AdapterError> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|e| AdapterError::Unknown(format!("browser slots closed: {e}")))?;

        let profile = tempfile::tempdir()
            .map_err(|e| AdapterError::Unknown(format!("creating browser profile dir: {e}")))?;

        let run = tokio::process::Command::new(&self.chrome_bin)
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-blink-features=AutomationControlled",
                "--window-size=1920,1080",
                &format!("--user-data-dir={}", profile.path().display()),
                "--dump-dom",
                url,
            ])
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.render_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AdapterError::Unknown(format!(
                    "launching {}: {e}",
                    self.chrome_bin
                )))
            }
            Err(_) => {
                return Err(AdapterError::Timeout(format!(
                    "browser render exceeded {:?} for {url}",
                    self.render_timeout
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, stderr = %stderr, "browser exited with error");
            return Err(AdapterError::from_provider_message(&stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SourceAdapter for BrowserSourceAdapter {
    fn variant(&self) -> AdapterVariant {
        AdapterVariant::Browser
    }

    fn supports(&self, source: &str) -> bool {
        self.url_templates.contains_key(source)
    }

    async fn attempt(&self, task: &SearchTask) -> Result<Vec<RawResult>, AdapterError> {
        let Some(template) = self.url_templates.get(&task.source) else {
            return Err(AdapterError::BadRequest(format!(
                "no search page configured for {}",
                task.source
            )));
        };
        let url = render_template(template, task, &task.query, true);
        let html = self.dump_dom(&url).await?;
        let results =
            parse_listing_cards(&task.source, &url, &html, task.results_wanted as usize)?;
        debug!(source = %task.source, cards = results.len(), "listing cards parsed");
        Ok(results)
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Unknown(format!("selector {css}: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_match<'a>(
    scope: ElementRef<'a>,
    selectors: &[&str],
) -> Result<Option<ElementRef<'a>>, AdapterError> {
    for css in selectors {
        if let Some(found) = scope.select(&selector(css)?).next() {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Result<Option<String>, AdapterError> {
    for css in selectors {
        let sel = selector(css)?;
        if let Some(text) = scope
            .select(&sel)
            .find_map(|n| text_or_none(n.text().collect::<String>()))
        {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// `--dump-dom` keeps hrefs as authored, so relative links are joined onto the
/// page URL.
fn resolve_link(page: Option<&Url>, href: String) -> String {
    match page.map(|base| base.join(&href)) {
        Some(Ok(absolute)) => absolute.into(),
        _ => href,
    }
}

fn read_card(card: ElementRef<'_>, page: Option<&Url>) -> Result<BrowserCard, AdapterError> {
    let link = first_match(card, LINK_SELECTORS)?
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| text_or_none(href.to_string()))
        .map(|href| resolve_link(page, href));
    let posted = first_match(card, &["time"])?.and_then(|t| {
        t.value()
            .attr("datetime")
            .and_then(|d| text_or_none(d.to_string()))
            .or_else(|| text_or_none(t.text().collect::<String>()))
    });

    Ok(BrowserCard {
        job_id: card
            .value()
            .attr("data-job-id")
            .or_else(|| card.value().attr("data-entity-urn"))
            .map(ToString::to_string),
        title: first_text(card, TITLE_SELECTORS)?,
        company: first_text(card, COMPANY_SELECTORS)?,
        location: first_text(card, LOCATION_SELECTORS)?,
        posted,
        link,
        description: first_text(card, DESCRIPTION_SELECTORS)?,
    })
}

/// True when the page text says "too many requests" or carries a standalone
/// `429` word. Digits inside longer numbers (job ids, prices) do not count.
fn signals_throttling(page_text: &str) -> bool {
    let lowered = page_text.to_lowercase();
    lowered.contains("too many requests")
        || lowered
            .split_whitespace()
            .any(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric()) == "429")
}

/// Parse up to `limit` listing cards out of a rendered search page loaded
/// from `page_url`.
pub fn parse_listing_cards(
    source: &str,
    page_url: &str,
    html: &str,
    limit: usize,
) -> Result<Vec<RawResult>, AdapterError> {
    if html.trim().is_empty() {
        return Err(AdapterError::Unknown("browser returned an empty DOM".into()));
    }
    let document = Html::parse_document(html);

    if signals_throttling(&document.root_element().text().collect::<Vec<_>>().join(" ")) {
        return Err(AdapterError::RateLimited("search page reports throttling".into()));
    }

    let page = Url::parse(page_url).ok();

    for css in CARD_SELECTORS {
        let sel = selector(css)?;
        let cards = document.select(&sel).collect::<Vec<_>>();
        if cards.is_empty() {
            continue;
        }
        let mut results = Vec::new();
        for card in cards.into_iter().take(limit.max(1)) {
            results.push(RawResult::browser_card(source, read_card(card, page.as_ref())?));
        }
        return Ok(results);
    }
    Err(AdapterError::Empty)
}
