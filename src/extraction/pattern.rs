//! Pattern-fallback tier: locale-aware regexes over visible text

use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

use super::Page;
use crate::locale::{self, NumberLocale};
use crate::models::VehicleFields;

/// A grouped number ("45.000", "45 000", "45,000") or a plain digit run
const NUMBER: &str = r"\d{1,3}(?:[.,'\x{20}\x{a0}\x{202f}]\d{3})+|\d+";

static PRICE_BEFORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?:€|EUR)\s*({NUMBER})")).expect("valid regex"));
static PRICE_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"({NUMBER})(?:,-|,00)?\s*(?:€|EUR)")).expect("valid regex"));
static MILEAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)({NUMBER})\s*km\b")).expect("valid regex"));
static CONSUMPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2}(?:[.,]\d{1,2})?)\s*l/100\s*km").expect("valid regex"));
static CO2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{2,3})\s*g(?:\s*CO2|\s*CO₂)?/km").expect("valid regex"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

pub fn extract(page: &Page<'_>, current: &VehicleFields) -> VehicleFields {
    let locale = page.country.number_locale();
    let text = page.text.as_str();
    let mut fields = VehicleFields::default();

    if current.price.is_none() {
        fields.price = find_price(text, locale);
    }

    if current.mileage_km.is_none() {
        fields.mileage_km = find_mileage(text, locale);
    }

    if current.power_kw.is_none() && current.power_hp.is_none() {
        let (kw, hp) = locale::parse_power(text);
        fields.power_kw = kw;
        fields.power_hp = hp;
    }

    if current.consumption_combined.is_none() {
        fields.consumption_combined = CONSUMPTION
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', ".").parse().ok());
    }

    if current.co2_emissions.is_none() {
        fields.co2_emissions = CO2
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
    }

    if current.year.is_none() && !has_non_date_registration(current) {
        fields.year = locale::parse_year(text);
    }

    if current.make.is_none() || current.model.is_none() {
        let (make, model) = heading_make_model(page);
        fields.make = make;
        fields.model = model;
    }

    fields
}

fn find_price(text: &str, locale: NumberLocale) -> Option<u64> {
    [&*PRICE_BEFORE, &*PRICE_AFTER].iter().find_map(|re| {
        re.captures_iter(text)
            .find_map(|c| locale::parse_price(c.get(1)?.as_str(), locale))
    })
}

/// First "N km" that is not part of a consumption ("l/100 km") or speed
/// ("km/h") figure
fn find_mileage(text: &str, locale: NumberLocale) -> Option<u64> {
    MILEAGE.captures_iter(text).find_map(|c| {
        let whole = c.get(0)?;
        let preceded_by_slash = text[..whole.start()].trim_end().ends_with('/');
        let followed_by_per = text[whole.end()..].starts_with('/');
        if preceded_by_slash || followed_by_per {
            return None;
        }
        locale::parse_integer(c.get(1)?.as_str(), locale)
    })
}

/// A registration like "Neu" or "Nuovo" means there is no year to find
fn has_non_date_registration(current: &VehicleFields) -> bool {
    current
        .first_registration
        .as_deref()
        .map_or(false, |r| !r.chars().any(|c| c.is_ascii_digit()))
}

/// "BMW 320d Touring" -> ("BMW", "320d")
fn heading_make_model(page: &Page<'_>) -> (Option<String>, Option<String>) {
    let Some(heading) = page.html.select(&HEADING).next() else {
        return (None, None);
    };
    let title = heading.text().collect::<String>();
    let mut words = title.split_whitespace();
    (
        words.next().map(str::to_string),
        words.next().map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Country;

    fn run(country: Country, body: &str) -> VehicleFields {
        let page = Page::parse("https://example.com/listing/1", country, body);
        extract(&page, &VehicleFields::default())
    }

    #[test]
    fn test_locale_mileage() {
        assert_eq!(run(Country::Fr, "<p>45 000 km</p>").mileage_km, Some(45_000));
        assert_eq!(run(Country::De, "<p>45.000 km</p>").mileage_km, Some(45_000));
        assert_eq!(run(Country::It, "<p>Chilometri: 45.000 km</p>").mileage_km, Some(45_000));
    }

    #[test]
    fn test_mileage_skips_consumption_and_speed() {
        let fields = run(
            Country::De,
            "<p>Verbrauch 5,1 l/100 km, Höchstgeschwindigkeit 250 km/h, Laufleistung 87.500 km</p>",
        );
        assert_eq!(fields.mileage_km, Some(87_500));
        assert_eq!(fields.consumption_combined, Some(5.1));
    }

    #[test]
    fn test_co2_figure() {
        let fields = run(Country::It, "<p>Emissioni: 128 g/km, consumo 4.9 l/100 km</p>");
        assert_eq!(fields.co2_emissions, Some(128));
        assert_eq!(fields.consumption_combined, Some(4.9));
    }

    #[test]
    fn test_mileage_not_fused_with_preceding_year() {
        let fields = run(Country::Fr, "<p>2019 45 000 km</p>");
        assert_eq!(fields.mileage_km, Some(45_000));
    }

    #[test]
    fn test_price_either_side() {
        assert_eq!(run(Country::De, "<p>Preis: € 25.900,-</p>").price, Some(25_900));
        assert_eq!(run(Country::Fr, "<p>Prix 18 490 €</p>").price, Some(18_490));
    }

    #[test]
    fn test_power_year_and_heading() {
        let fields = run(Country::De, "<h1>Audi A4 Avant</h1><p>Erstzulassung 06/2018, 140 kW (190 PS)</p>");
        assert_eq!(fields.make.as_deref(), Some("Audi"));
        assert_eq!(fields.model.as_deref(), Some("A4"));
        assert_eq!(fields.year, Some(2018));
        assert_eq!(fields.power_kw, Some(140));
        assert_eq!(fields.power_hp, Some(190));
    }

    #[test]
    fn test_existing_fields_are_not_recomputed() {
        let page = Page::parse("https://example.com/listing/1", Country::De, "<p>12.000 km, 2015</p>");
        let current = VehicleFields {
            mileage_km: Some(45_000),
            first_registration: Some("Neu".to_string()),
            ..Default::default()
        };
        let fields = extract(&page, &current);
        assert_eq!(fields.mileage_km, None);
        assert_eq!(fields.year, None);
    }
}
