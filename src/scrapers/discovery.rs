//! Search-page discovery
//!
//! Walks the marketplace's search result pages for a country and turns
//! result cards into listing fetch tasks. Whatever the card itself shows
//! (data attributes, price, power, seller) travels with the task.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

use crate::locale::{find_uuid, parse_integer, parse_power, parse_price, parse_year};
use crate::models::{Condition, Country, FuelType, SellerType, VehicleFields};
use crate::scrapers::types::{FetchTask, RawResponse, SearchParams};

static CARD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article").expect("valid selector"));
static LISTING_DIV_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[data-testid*="listing"]"#).expect("valid selector"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static PRICE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[data-testid*="price"], [class*="price"], [class*="Price"]"#).expect("valid selector"));
static IMAGE_COUNTER_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[data-testid="decluttered-list-item-image-counter"]"#).expect("valid selector")
});
static IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid selector"));
static DEALER_NAME_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[data-testid="dealer-company-name"]"#).expect("valid selector"));
static DEALER_ADDRESS_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[data-testid="dealer-address"]"#).expect("valid selector"));

/// Candidate URLs collected per country, relative to the accepted-record cap
const CANDIDATE_HEADROOM: usize = 2;

/// Search result URL for one page
pub fn build_search_url(country: Country, make: Option<&str>, params: &SearchParams, page: u32) -> String {
    let mut url = format!("https://{}{}/lst", country.domain(), country.path_prefix());
    if let Some(make) = make {
        url.push('/');
        url.push_str(&make_slug(make));
    }

    let mut query = vec![
        "atype=C".to_string(),
        "sort=standard".to_string(),
        "desc=0".to_string(),
        format!("page={}", page),
    ];
    match params.condition {
        Some(Condition::New) => query.push("ustate=N".to_string()),
        Some(Condition::Used) => query.push("ustate=U".to_string()),
        None => {}
    }
    if let Some(min) = params.min_price {
        query.push(format!("pricefrom={}", min));
    }
    if let Some(max) = params.max_price {
        query.push(format!("priceto={}", max));
    }

    format!("{}?{}", url, query.join("&"))
}

fn make_slug(make: &str) -> String {
    make.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

/// Source of usable search result pages. The harvester answers with the
/// same detector and fallback policy it applies to listing pages.
#[async_trait]
pub trait SearchPages: Send + Sync {
    /// `None` when the page failed or stayed blocked
    async fn search_page(&self, task: &FetchTask) -> Option<RawResponse>;
}

/// Tasks found for one country, with how many search pages were asked for
/// and how many came back usable
#[derive(Debug, Default)]
pub struct Discovered {
    pub tasks: Vec<FetchTask>,
    pub pages_requested: usize,
    pub pages_usable: usize,
}

fn fuel_from_code(code: &str) -> Option<FuelType> {
    match code.trim().to_lowercase().as_str() {
        "b" => Some(FuelType::Petrol),
        "d" => Some(FuelType::Diesel),
        "e" => Some(FuelType::Electric),
        "2" => Some(FuelType::Hybrid),
        "m" => Some(FuelType::PluginHybrid),
        "l" => Some(FuelType::Lpg),
        "c" => Some(FuelType::Cng),
        "h" => Some(FuelType::Hydrogen),
        _ => None,
    }
}

fn element_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let el = card.select(selector).next()?;
    let text = el.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Fields shown on a result card: `data-*` attributes first, card text for
/// the rest
fn parse_card(card: ElementRef<'_>, country: Country) -> VehicleFields {
    let attr = |name: &str| {
        card.value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let locale = country.number_locale();
    let text = card.text().collect::<Vec<_>>().join(" ");

    let mut fields = VehicleFields {
        make: attr("data-make").map(str::to_string),
        model: attr("data-model").map(str::to_string),
        price: attr("data-price").and_then(|p| p.parse().ok()),
        mileage_km: attr("data-mileage").and_then(|m| m.parse().ok()),
        fuel_type: attr("data-fuel-type").and_then(fuel_from_code),
        seller_type: attr("data-seller-type").map(|s| {
            if s.eq_ignore_ascii_case("d") {
                SellerType::Dealer
            } else {
                SellerType::Private
            }
        }),
        seller_name: element_text(card, &DEALER_NAME_SELECTOR),
        seller_location: element_text(card, &DEALER_ADDRESS_SELECTOR),
        ..VehicleFields::default()
    };

    if let Some(registration) = attr("data-first-registration") {
        fields.year = parse_year(registration);
        fields.first_registration = Some(registration.to_string());
    }

    if fields.price.is_none() {
        fields.price = element_text(card, &PRICE_SELECTOR).and_then(|p| parse_price(&p, locale));
    }

    let (kw, hp) = parse_power(&text);
    fields.power_kw = kw;
    fields.power_hp = hp;

    fields.image_count = element_text(card, &IMAGE_COUNTER_SELECTOR)
        .and_then(|c| parse_integer(&c, locale))
        .and_then(|c| u32::try_from(c).ok())
        .or_else(|| u32::try_from(card.select(&IMAGE_SELECTOR).count()).ok());

    fields
}

/// Listing detail URLs found on one search result page
pub fn parse_search_results(html: &str, country: Country) -> Vec<FetchTask> {
    let document = Html::parse_document(html);
    let base = Url::parse(&format!("https://{}/", country.domain())).ok();

    let mut cards: Vec<_> = document.select(&CARD_SELECTOR).collect();
    if cards.is_empty() {
        cards = document.select(&LISTING_DIV_SELECTOR).collect();
    }

    let detail_marker = format!("/{}/", country.detail_path());
    let mut tasks = Vec::new();

    for card in cards {
        let href = card
            .select(&LINK_SELECTOR)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| href.contains(&detail_marker));

        let url = match (href, card.value().attr("data-guid")) {
            (Some(href), _) => match &base {
                Some(base) => base.join(href).ok().map(|u| u.to_string()),
                None => None,
            },
            (None, Some(guid)) if find_uuid(guid).is_some() => Some(format!(
                "https://{}{}/{}/{}",
                country.domain(),
                country.path_prefix(),
                country.detail_path(),
                guid
            )),
            _ => None,
        };

        if let Some(url) = url {
            tasks.push(FetchTask::new(url, country).with_card(parse_card(card, country)));
        }
    }

    tasks
}

/// Collect listing fetch tasks for one country
pub async fn discover(pages: &dyn SearchPages, params: &SearchParams, country: Country) -> Discovered {
    let cap = params.max_listings_per_country.saturating_mul(CANDIDATE_HEADROOM).max(1);
    let makes: Vec<Option<&str>> = if params.makes.is_empty() {
        vec![None]
    } else {
        params.makes.iter().map(|m| Some(m.as_str())).collect()
    };

    let mut seen = HashSet::new();
    let mut found = Discovered::default();

    'makes: for make in makes {
        for page in 1..=params.max_search_pages {
            let url = build_search_url(country, make, params, page);
            found.pages_requested += 1;
            let Some(response) = pages.search_page(&FetchTask::new(url, country)).await else {
                break;
            };
            found.pages_usable += 1;

            let before = found.tasks.len();
            for task in parse_search_results(&response.body, country) {
                if seen.insert(task.url.clone()) {
                    found.tasks.push(task);
                }
            }
            let added = found.tasks.len() - before;
            debug!("{} page {}: {} new listings", country, page, added);

            if found.tasks.len() >= cap {
                found.tasks.truncate(cap);
                break 'makes;
            }
            if added == 0 {
                break;
            }
        }
    }

    info!(
        "🔎 {}: discovered {} listing URLs ({}/{} search pages usable)",
        country,
        found.tasks.len(),
        found.pages_usable,
        found.pages_requested
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url() {
        let params = SearchParams {
            condition: Some(Condition::Used),
            min_price: Some(5000),
            max_price: Some(30000),
            ..SearchParams::default()
        };
        assert_eq!(
            build_search_url(Country::De, Some("BMW"), &params, 2),
            "https://www.autoscout24.de/lst/bmw?atype=C&sort=standard&desc=0&page=2&ustate=U&pricefrom=5000&priceto=30000"
        );
        assert_eq!(
            build_search_url(Country::Be, Some("Land Rover"), &SearchParams::default(), 1),
            "https://www.autoscout24.be/fr/lst/land-rover?atype=C&sort=standard&desc=0&page=1"
        );
    }

    #[test]
    fn test_parse_cards() {
        let html = r#"
            <html><body>
              <article data-guid="0c6a1b2e-1111-2222-3333-444455556666">
                <a href="/angebote/bmw-320d-0c6a1b2e-1111-2222-3333-444455556666">BMW 320d</a>
              </article>
              <article data-guid="9d7e5f40-aaaa-bbbb-cccc-ddddeeeeffff">
                <a href="/haendler/autohaus">Dealer</a>
              </article>
              <article><a href="/lst/bmw?page=2">next</a></article>
            </body></html>
        "#;

        let tasks = parse_search_results(html, Country::De);
        let urls: Vec<&str> = tasks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.autoscout24.de/angebote/bmw-320d-0c6a1b2e-1111-2222-3333-444455556666",
                "https://www.autoscout24.de/angebote/9d7e5f40-aaaa-bbbb-cccc-ddddeeeeffff",
            ]
        );
    }

    #[test]
    fn test_card_data_travels_with_task() {
        let html = r#"
            <article data-guid="0c6a1b2e-1111-2222-3333-444455556666" data-make="bmw" data-model="320"
                     data-price="24900" data-mileage="45000" data-fuel-type="d"
                     data-first-registration="07-2019" data-seller-type="d">
              <a href="/angebote/bmw-320-0c6a1b2e-1111-2222-3333-444455556666">BMW 320d Touring</a>
              <span>140 kW (190 PS)</span>
              <img src="a.jpg"><img src="b.jpg">
              <span data-testid="dealer-company-name">Autohaus Süd</span>
              <span data-testid="dealer-address">80331 München</span>
            </article>
            <article>
              <a href="/angebote/golf-abc">VW Golf</a>
              <p data-testid="regular-price">€ 12.490,-</p>
              <span data-testid="decluttered-list-item-image-counter">17</span>
              <img src="c.jpg">
            </article>"#;

        let tasks = parse_search_results(html, Country::De);
        let full = tasks[0].card.as_ref().unwrap();
        assert_eq!(full.make.as_deref(), Some("bmw"));
        assert_eq!(full.model.as_deref(), Some("320"));
        assert_eq!(full.price, Some(24_900));
        assert_eq!(full.mileage_km, Some(45_000));
        assert_eq!(full.fuel_type, Some(FuelType::Diesel));
        assert_eq!(full.year, Some(2019));
        assert_eq!(full.first_registration.as_deref(), Some("07-2019"));
        assert_eq!(full.seller_type, Some(SellerType::Dealer));
        assert_eq!(full.power_kw, Some(140));
        assert_eq!(full.image_count, Some(2));
        assert_eq!(full.seller_name.as_deref(), Some("Autohaus Süd"));
        assert_eq!(full.seller_location.as_deref(), Some("80331 München"));

        let sparse = tasks[1].card.as_ref().unwrap();
        assert_eq!(sparse.make, None);
        assert_eq!(sparse.price, Some(12_490));
        assert_eq!(sparse.image_count, Some(17));
    }

    #[test]
    fn test_belgian_cards_keep_prefix() {
        let html = r#"<article><a href="/fr/offres/audi-a4-abc">Audi</a></article>"#;
        let tasks = parse_search_results(html, Country::Be);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].url, "https://www.autoscout24.be/fr/offres/audi-a4-abc");
        assert_eq!(tasks[0].country, Country::Be);
    }
}
