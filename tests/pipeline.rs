use async_trait::async_trait;
use car_scout::config::RunConfig;
use car_scout::models::{Condition, Country, Field, Tier};
use car_scout::scrapers::discovery::build_search_url;
use car_scout::scrapers::scheduler::SchedulerConfig;
use car_scout::scrapers::{FetchRequest, FetchTask, PageFetcher, RawResponse};
use car_scout::{Harvester, ScrapeError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const FILLER: &str = "Gepflegtes Fahrzeug aus erster Hand mit vollständiger Historie. ";

#[derive(Clone)]
enum Reply {
    Page(String),
    RateLimited,
    Transient,
}

/// In-memory fetch path keyed by URL; unknown URLs answer 404
struct MapFetcher {
    replies: HashMap<String, Reply>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MapFetcher {
    fn new(replies: Vec<(String, Reply)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.into_iter().collect(),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, ScrapeError> {
        *self.calls.lock().unwrap().entry(request.url.clone()).or_insert(0) += 1;

        let page = |status: u16, body: String| RawResponse {
            url: request.url.clone(),
            status,
            headers: Vec::new(),
            body,
            rendered: false,
        };

        match self.replies.get(&request.url) {
            Some(Reply::Page(body)) => Ok(page(200, body.clone())),
            Some(Reply::RateLimited) => Err(ScrapeError::RateLimited {
                url: request.url.clone(),
                status: 429,
                retry_after: None,
            }),
            Some(Reply::Transient) => Err(ScrapeError::TransientNetwork {
                url: request.url.clone(),
                reason: "connection reset".to_string(),
            }),
            None => Ok(page(404, String::new())),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn detail_page(make: &str, model: &str, price: Option<u64>, mileage: u64, year: i32) -> String {
    let offers = price
        .map(|p| format!(r#","offers":{{"@type":"Offer","price":"{}","priceCurrency":"EUR"}}"#, p))
        .unwrap_or_default();
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@context":"https://schema.org","@type":"Car","brand":{{"@type":"Brand","name":"{make}"}},
          "model":"{model}","productionDate":"{year}",
          "mileageFromOdometer":{{"@type":"QuantitativeValue","value":{mileage},"unitCode":"KMT"}}{offers}}}
        </script></head><body><p>{filler}</p></body></html>"#,
        make = make,
        model = model,
        year = year,
        mileage = mileage,
        offers = offers,
        filler = FILLER.repeat(50),
    )
}

fn listing_url(country: Country, id: u32) -> String {
    format!(
        "https://{}{}/{}/car-{:08x}-0000-4000-8000-000000000000",
        country.domain(),
        country.path_prefix(),
        country.detail_path(),
        id
    )
}

fn fast_config() -> RunConfig {
    let mut config = RunConfig::default();
    config.search.countries = Country::ALL.to_vec();
    config.scheduler = SchedulerConfig {
        max_concurrent: 5,
        base_delay_ms: 0,
        jitter_ms: 0,
        max_retries: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        run_timeout_secs: None,
    };
    config
}

fn tasks(urls: &[(String, Country)]) -> Vec<FetchTask> {
    urls.iter().map(|(url, country)| FetchTask::new(url.clone(), *country)).collect()
}

#[tokio::test]
async fn test_duplicate_source_id_emits_one_record() {
    let uuid = "3f1c2d4e-5a6b-4c7d-8e9f-0a1b2c3d4e5f";
    let first = format!("https://www.autoscout24.de/angebote/bmw-320d-{}", uuid);
    let second = format!("https://www.autoscout24.de/angebote/bmw-320d-touring-{}", uuid);

    let fetcher = MapFetcher::new(vec![
        (first.clone(), Reply::Page(detail_page("BMW", "BMW 320d", Some(24900), 45000, 2019))),
        (second.clone(), Reply::Page(detail_page("BMW", "BMW 320d", Some(19900), 45000, 2019))),
    ]);
    let harvester = Arc::new(Harvester::from_config(&fast_config(), fetcher, None));

    let report = harvester
        .run(tasks(&[(first, Country::De), (second, Country::De)]))
        .await
        .unwrap();

    assert_eq!(report.listings.len(), 1);
    assert_eq!(report.listings.combined[0].source_id.as_deref(), Some(uuid));
    assert_eq!(report.metrics.duplicates, 1);
    assert_eq!(report.summary.accepted, 1);
    assert_eq!(report.summary.rejected, 1);
}

#[tokio::test]
async fn test_structured_mileage_wins_over_text() {
    let url = listing_url(Country::De, 1);
    let body = detail_page("Audi", "Audi A4", Some(18500), 45000, 2018)
        .replace("<body>", "<body><p>Nur 12.345 km gelaufen</p>");
    let fetcher = MapFetcher::new(vec![(url.clone(), Reply::Page(body))]);
    let harvester = Arc::new(Harvester::from_config(&fast_config(), fetcher, None));

    let report = harvester.run(tasks(&[(url, Country::De)])).await.unwrap();

    let record = &report.listings.combined[0];
    assert_eq!(record.fields.mileage_km, Some(45000));
    assert_eq!(record.provenance.get(&Field::Mileage), Some(&Tier::Structured));
    assert_eq!(record.fields.model.as_deref(), Some("A4"));
    assert!(report.metrics.structured_hits >= 1);
}

#[tokio::test]
async fn test_rate_limited_url_fails_once_after_retry_ceiling() {
    let blocked = listing_url(Country::It, 1);
    let good = listing_url(Country::It, 2);
    let fetcher = MapFetcher::new(vec![
        (blocked.clone(), Reply::RateLimited),
        (good.clone(), Reply::Page(detail_page("Fiat", "Fiat 500", Some(9900), 30000, 2020))),
    ]);
    let harvester = Arc::new(Harvester::from_config(&fast_config(), fetcher.clone(), None));

    let report = harvester
        .run(tasks(&[(blocked.clone(), Country::It), (good, Country::It)]))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(&blocked), 4);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.backed_off, 3);
    assert_eq!(report.listings.len(), 1);
    assert!(report.listings.combined.iter().all(|r| r.listing_url != blocked));
}

#[tokio::test]
async fn test_price_and_make_filters() {
    let mut config = fast_config();
    config.search.makes = vec!["bmw".to_string(), "audi".to_string()];
    config.search.max_price = Some(30000);

    let pages = [
        ("BMW", "BMW 118i", 21000, Country::De),
        ("Audi", "Audi Q5", 45000, Country::De),
        ("Audi", "Audi A3", 30000, Country::Fr),
        ("Renault", "Renault Clio", 12000, Country::Fr),
        ("BMW", "BMW X1", 29999, Country::Be),
    ];
    let mut replies = Vec::new();
    let mut urls = Vec::new();
    for (i, (make, model, price, country)) in pages.iter().enumerate() {
        let url = listing_url(*country, i as u32);
        replies.push((url.clone(), Reply::Page(detail_page(make, model, Some(*price), 20000, 2021))));
        urls.push((url, *country));
    }

    let harvester = Arc::new(Harvester::from_config(&config, MapFetcher::new(replies), None));
    let report = harvester.run(tasks(&urls)).await.unwrap();

    assert_eq!(report.listings.len(), 3);
    assert_eq!(report.metrics.filtered, 2);
    for record in &report.listings.combined {
        assert!(record.price().is_some_and(|p| p <= 30000));
        assert!(matches!(record.make(), Some("BMW") | Some("Audi")));
    }
    assert_eq!(report.listings.by_country.len(), 3);
}

#[tokio::test]
async fn test_country_cutoff_stops_admission() {
    let mut config = fast_config();
    config.search.max_listings_per_country = 3;

    let mut replies = Vec::new();
    let mut urls = Vec::new();
    for i in 0..8 {
        let url = listing_url(Country::Fr, i);
        replies.push((url.clone(), Reply::Page(detail_page("Peugeot", "Peugeot 308", Some(15000 + i as u64), 40000, 2020))));
        urls.push((url, Country::Fr));
    }
    let fetcher = MapFetcher::new(replies);
    let harvester = Arc::new(Harvester::from_config(&config, fetcher.clone(), None));

    let report = harvester.run(tasks(&urls)).await.unwrap();

    assert_eq!(report.listings.by_country[&Country::Fr].len(), 3);
    assert_eq!(report.summary.skipped_cutoff, 5);
    assert_eq!(fetcher.total_calls(), 3);
}

#[tokio::test]
async fn test_blocked_page_escalates_to_fallback() {
    let url = listing_url(Country::Be, 7);
    let challenge = r#"<html><script src="https://geo.captcha-delivery.com/c.js"></script></html>"#;
    let http = MapFetcher::new(vec![(url.clone(), Reply::Page(challenge.to_string()))]);
    let browser = MapFetcher::new(vec![(
        url.clone(),
        Reply::Page(detail_page("Volkswagen", "Volkswagen Golf", Some(17500), 60000, 2019)),
    )]);

    let mut config = fast_config();
    config.fetch.fallback_enabled = true;
    let harvester = Arc::new(Harvester::from_config(&config, http.clone(), Some(browser.clone())));
    let report = harvester.run(tasks(&[(url.clone(), Country::Be)])).await.unwrap();

    assert_eq!(report.listings.len(), 1);
    assert_eq!(report.metrics.fallback_escalated, 1);
    assert_eq!(http.calls(&url), 1);
    assert_eq!(browser.calls(&url), 1);
}

#[tokio::test]
async fn test_blocked_page_without_fallback_fails() {
    let url = listing_url(Country::Be, 8);
    let ok = listing_url(Country::Be, 9);
    let challenge = r#"<html><body>Are you a robot?</body></html>"#;
    let http = MapFetcher::new(vec![
        (url.clone(), Reply::Page(challenge.to_string())),
        (ok.clone(), Reply::Page(detail_page("Skoda", "Skoda Octavia", Some(14000), 80000, 2018))),
    ]);

    let harvester = Arc::new(Harvester::from_config(&fast_config(), http, None));
    let report = harvester
        .run(tasks(&[(url, Country::Be), (ok, Country::Be)]))
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.metrics.fallback_escalated, 0);
    assert_eq!(report.listings.len(), 1);
}

#[tokio::test]
async fn test_every_request_failing_fails_the_run() {
    let urls: Vec<(String, Country)> = (0..3).map(|i| (listing_url(Country::De, i), Country::De)).collect();
    let fetcher = MapFetcher::new(urls.iter().map(|(u, _)| (u.clone(), Reply::Transient)).collect());
    let harvester = Arc::new(Harvester::from_config(&fast_config(), fetcher, None));

    let err = harvester.run(tasks(&urls)).await.unwrap_err();
    assert!(err.to_string().contains("All 3 fetches failed"));
}

#[tokio::test]
async fn test_invalid_fields_are_nulled_and_incomplete_records_dropped() {
    let old = listing_url(Country::De, 1);
    let no_price = listing_url(Country::De, 2);
    let fetcher = MapFetcher::new(vec![
        (old.clone(), Reply::Page(detail_page("Porsche", "Porsche 911", Some(89000), 120000, 1970))),
        (no_price.clone(), Reply::Page(detail_page("Opel", "Opel Corsa", None, 50000, 2017))),
    ]);
    let harvester = Arc::new(Harvester::from_config(&fast_config(), fetcher, None));

    let report = harvester
        .run(tasks(&[(old, Country::De), (no_price, Country::De)]))
        .await
        .unwrap();

    assert_eq!(report.listings.len(), 1);
    assert_eq!(report.metrics.incomplete, 1);
    assert_eq!(report.metrics.nulled_fields, 1);

    let record = &report.listings.combined[0];
    assert_eq!(record.fields.year, None);
    assert_eq!(record.condition(), Some(Condition::Used));
    for record in &report.listings.combined {
        let bounds = car_scout::models::ValidationConfig::default();
        assert!(record.fields.year.map_or(true, |y| y >= bounds.min_year && y <= bounds.max_year()));
    }
}

fn search_page(cards: &str) -> String {
    format!("<html><body>{}<p>{}</p></body></html>", cards, FILLER.repeat(50))
}

fn search_config(country: Country) -> RunConfig {
    let mut config = fast_config();
    config.search.countries = vec![country];
    config.search.max_search_pages = 1;
    config
}

#[tokio::test]
async fn test_discovery_fails_when_every_search_page_is_rate_limited() {
    let config = search_config(Country::De);
    let search = build_search_url(Country::De, None, &config.search, 1);
    let fetcher = MapFetcher::new(vec![(search.clone(), Reply::RateLimited)]);
    let harvester = Harvester::from_config(&config, fetcher.clone(), None);

    let err = harvester.discover(&config.search).await.unwrap_err();

    assert!(err.to_string().contains("All 1 search pages failed"));
    assert_eq!(fetcher.calls(&search), 4);
}

#[tokio::test]
async fn test_blocked_search_page_escalates_to_fallback() {
    let mut config = search_config(Country::Fr);
    config.fetch.fallback_enabled = true;
    let search = build_search_url(Country::Fr, None, &config.search, 1);
    let challenge = r#"<html><body>Are you a robot?</body></html>"#;
    let results = search_page(r#"<article><a href="/offres/peugeot-208-abc">Peugeot 208</a></article>"#);

    let http = MapFetcher::new(vec![(search.clone(), Reply::Page(challenge.to_string()))]);
    let browser = MapFetcher::new(vec![(search.clone(), Reply::Page(results))]);
    let harvester = Harvester::from_config(&config, http, Some(browser.clone()));

    let tasks = harvester.discover(&config.search).await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].url, "https://www.autoscout24.fr/offres/peugeot-208-abc");
    assert_eq!(browser.calls(&search), 1);
}

#[tokio::test]
async fn test_card_stands_in_for_lost_detail_page() {
    let config = search_config(Country::It);
    let search = build_search_url(Country::It, None, &config.search, 1);
    let detail = listing_url(Country::It, 5);
    let path = detail.trim_start_matches("https://www.autoscout24.it");
    let card = format!(
        r#"<article data-make="fiat" data-model="Panda" data-price="8900" data-mileage="52000"
                    data-fuel-type="b" data-first-registration="03-2020" data-seller-type="p">
             <a href="{}">Fiat Panda</a>
           </article>"#,
        path
    );

    let fetcher = MapFetcher::new(vec![
        (search, Reply::Page(search_page(&card))),
        (detail.clone(), Reply::Transient),
    ]);
    let harvester = Arc::new(Harvester::from_config(&config, fetcher, None));

    let tasks = harvester.discover(&config.search).await.unwrap();
    let report = harvester.run(tasks).await.unwrap();

    assert_eq!(report.summary.accepted, 1);
    assert_eq!(report.metrics.card_hits, 1);
    let record = &report.listings.combined[0];
    assert_eq!(record.listing_url, detail);
    assert_eq!(record.make(), Some("Fiat"));
    assert_eq!(record.price(), Some(8900));
    assert_eq!(record.fields.fuel_type, Some(car_scout::models::FuelType::Petrol));
    assert_eq!(record.provenance.get(&Field::Price), Some(&Tier::Card));
}
