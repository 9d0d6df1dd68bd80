use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::config::ScraperConfig;
use crate::models::{FREE_PRICE_SENTINEL, Listing};
use crate::plugins::traits::SourceFetcher;
use crate::{AppError, Result};

/// Container selectors, most specific layout first. The first one that
/// yields at least one listing wins.
const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    ".ad-listitem",
    ".aditem",
    "[data-adid]",
    ".ad-item",
    "li[data-adid]",
    ".srp-results-item",
];

const FALLBACK_LINK_SELECTOR: &str = r#"a[href*="/s-anzeige/"]"#;

fn trailing_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d+)$").expect("static regex"))
}

pub struct ListingScraper {
    client: Client,
    base_url: Url,
}

impl ListingScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| AppError::Validation(format!("Invalid accept_language: {}", e)))?,
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| AppError::Parse {
            message: format!("Invalid base URL '{}': {}", config.base_url, e),
        })?;

        Ok(Self { client, base_url })
    }

    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        tracing::debug!("Fetching listings from {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SourceFetcher for ListingScraper {
    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        let html = self.fetch_page(query_url).await?;
        let listings = parse_listings(&html, &self.base_url);
        tracing::debug!("Parsed {} listings from {}", listings.len(), query_url);
        Ok(listings)
    }
}

/// Extract listings from a search result page.
pub fn parse_listings(html: &str, base_url: &Url) -> Vec<Listing> {
    let document = Html::parse_document(html);

    for selector_str in CONTAINER_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };

        let listings: Vec<Listing> = document
            .select(&selector)
            .filter_map(|element| parse_container(element, base_url))
            .collect();

        if !listings.is_empty() {
            tracing::trace!("Selector {:?} matched {} listings", selector_str, listings.len());
            return listings;
        }
    }

    tracing::debug!("No container selector matched, falling back to listing links");
    parse_fallback_links(&document, base_url)
}

fn parse_container(element: ElementRef<'_>, base_url: &Url) -> Option<Listing> {
    let link_href = first_attr(element, "a", "href");

    // Empty attributes fall through to the next source
    let non_empty = |id: &String| !id.trim().is_empty();
    let id = element
        .value()
        .attr("data-adid")
        .map(str::to_string)
        .filter(non_empty)
        .or_else(|| element.value().attr("data-id").map(str::to_string).filter(non_empty))
        .or_else(|| first_attr(element, "[data-adid]", "data-adid").filter(non_empty))
        .or_else(|| link_href.as_deref().and_then(trailing_id));

    let Some(id) = id else {
        tracing::trace!("Skipping element: no ad id found");
        return None;
    };

    let title = first_text(element, &["h2", "h3", ".ad-title", "a"]);
    if title.is_empty() {
        tracing::trace!("Skipping ad {}: no title found", id);
        return None;
    }

    let url = link_href
        .map(|href| absolutize(&href, base_url))
        .unwrap_or_default();

    let price = first_text(element, &[".price", ".ad-price"]);

    Some(Listing {
        id,
        title,
        description: first_text(element, &["p", ".ad-description"]),
        price: if price.is_empty() {
            FREE_PRICE_SENTINEL.to_string()
        } else {
            price
        },
        location: first_text(element, &[".location", ".ad-location"]),
        url,
        image_url: first_attr(element, "img", "src").or_else(|| first_attr(element, "img", "data-src")),
    })
}

fn parse_fallback_links(document: &Html, base_url: &Url) -> Vec<Listing> {
    let Ok(selector) = Selector::parse(FALLBACK_LINK_SELECTOR) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            let id = trailing_id(href)?;
            let title = element_text(link);
            if title.is_empty() {
                return None;
            }
            Some(Listing::new(id, title, absolutize(href, base_url)))
        })
        .collect()
}

/// Text of every match of the first selector that produces any, whitespace collapsed.
fn first_text(element: ElementRef<'_>, selectors: &[&str]) -> String {
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let text = element
            .select(&selector)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            return text;
        }
    }
    String::new()
}

fn first_attr(element: ElementRef<'_>, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    element
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(str::to_string)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn trailing_id(href: &str) -> Option<String> {
    trailing_id_regex()
        .captures(href)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn absolutize(href: &str, base_url: &Url) -> String {
    if href.starts_with("http") {
        return href.to_string();
    }
    base_url
        .join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_url.as_str().trim_end_matches('/'), href))
}
