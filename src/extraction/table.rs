//! Localized table tier
//!
//! Reads labeled spec blocks (`dl/dt/dd`, table rows, key-value divs) and maps
//! labels to canonical fields through the country's label dictionary. Also
//! collects equipment lists and the seller block.

use scraper::{ElementRef, Selector};
use std::sync::LazyLock;

use super::Page;
use crate::locale::{self, NumberLocale};
use crate::models::{Field, SellerType, VehicleFields};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static DL: LazyLock<Selector> = LazyLock::new(|| selector("dl"));
static DT: LazyLock<Selector> = LazyLock::new(|| selector("dt"));
static DD: LazyLock<Selector> = LazyLock::new(|| selector("dd"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("table tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td, th"));
static KEY_VALUE: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"[data-testid*="spec"], [data-testid*="detail"], [data-testid*="key-value"]"#)
});
static EQUIPMENT_ITEM: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        r#"[class*="quipment"] li, [class*="usstattung"] li, [data-testid*="equipment"] li, [class*="feature"] li"#,
    )
});
static SELLER: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"[data-testid*="seller"], [data-testid*="dealer"], [class*="eller"], [class*="ealer"]"#)
});
static SELLER_NAME: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"[data-testid*="company-name"], [data-testid*="dealer-name"], [data-testid*="seller-name"], h2, h3"#)
});
static SELLER_LOCATION: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"[data-testid*="address"], [data-testid*="location"], [class*="ddress"], [class*="ocation"]"#)
});

const SAFETY_WORDS: &[&str] = &[
    "airbag", "abs", "esp", "asr", "isofix", "notbrems", "freinage", "frenata", "spurhalte", "lane",
    "blind", "toter winkel", "angle mort",
];
const COMFORT_WORDS: &[&str] = &[
    "klima", "climatisation", "aria condizionata", "sitzheizung", "sièges chauffants",
    "sedili riscaldati", "tempomat", "cruise", "régulateur", "navi", "gps", "parksens", "parking",
    "parcheggio", "leder", "cuir", "pelle",
];
const DEALER_WORDS: &[&str] = &["händler", "concessionnaire", "professionnel", "dealer", "concessionario"];
const PRIVATE_WORDS: &[&str] = &["privat", "particulier", "private", "privato"];

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every (label, value) pair found in the page's spec blocks, in document order
pub fn label_value_pairs(page: &Page<'_>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for dl in page.html.select(&DL) {
        let labels = dl.select(&DT).map(element_text);
        let values = dl.select(&DD).map(element_text);
        pairs.extend(labels.zip(values));
    }

    for row in page.html.select(&ROW) {
        let cells: Vec<String> = row.select(&CELL).map(element_text).collect();
        if cells.len() >= 2 {
            pairs.push((cells[0].clone(), cells[1].clone()));
        }
    }

    for container in page.html.select(&KEY_VALUE) {
        let children: Vec<ElementRef<'_>> = container.children().filter_map(ElementRef::wrap).collect();
        if children.len() == 2 {
            pairs.push((element_text(children[0]), element_text(children[1])));
        }
    }

    pairs
}

pub fn extract(page: &Page<'_>, current: &VehicleFields) -> VehicleFields {
    let locale = page.country.number_locale();
    let mut fields = VehicleFields::default();

    for (label, value) in label_value_pairs(page) {
        let Some(field) = locale::canonical_field(&label, page.country) else {
            continue;
        };
        if !current.is_missing(field) || value.trim().is_empty() {
            continue;
        }
        apply(&mut fields, field, &value, locale);
    }

    if current.equipment.is_empty() {
        collect_equipment(page, &mut fields);
    }
    if current.seller_type.is_none() {
        fields.seller_type = seller_type(page);
    }
    if current.seller_name.is_none() || current.seller_location.is_none() {
        let (name, location) = seller_contact(page);
        fields.seller_name = fields.seller_name.take().or(name);
        fields.seller_location = fields.seller_location.take().or(location);
    }

    fields
}

/// Apply one labeled value; the first occurrence of a label wins
fn apply(fields: &mut VehicleFields, field: Field, value: &str, locale: NumberLocale) {
    let value = value.trim();
    let text = || Some(value.to_string());

    match field {
        Field::Make if fields.make.is_none() => fields.make = text(),
        Field::Model if fields.model.is_none() => fields.model = text(),
        Field::Trim if fields.trim.is_none() => fields.trim = text(),
        Field::Price if fields.price.is_none() => fields.price = locale::parse_price(value, locale),
        Field::Mileage if fields.mileage_km.is_none() => {
            fields.mileage_km = locale::parse_integer(value, locale)
        }
        Field::FirstRegistration if fields.first_registration.is_none() => {
            fields.first_registration = text();
            fields.year = locale::parse_year(value);
        }
        Field::Year if fields.year.is_none() => fields.year = locale::parse_year(value),
        Field::FuelType if fields.fuel_type.is_none() => fields.fuel_type = Some(locale::normalize_fuel(value)),
        Field::Transmission => {
            if fields.transmission.is_none() {
                fields.transmission = Some(locale::normalize_transmission(value));
            }
            // "Automatik (8 Gänge)"
            if fields.gears.is_none() {
                fields.gears = first_digit(value);
            }
        }
        Field::PowerKw | Field::PowerHp => {
            let (kw, hp) = locale::parse_power(value);
            fields.power_kw = fields.power_kw.or(kw);
            fields.power_hp = fields.power_hp.or(hp);
        }
        Field::BodyType if fields.body_type.is_none() => fields.body_type = text(),
        Field::Color if fields.color.is_none() => fields.color = text(),
        Field::Doors if fields.doors.is_none() => fields.doors = small_count(value, locale),
        Field::Seats if fields.seats.is_none() => fields.seats = small_count(value, locale),
        Field::PreviousOwners if fields.previous_owners.is_none() => {
            fields.previous_owners = small_count(value, locale)
        }
        Field::Condition if fields.condition.is_none() => fields.condition = locale::normalize_condition(value),
        Field::EngineCc if fields.engine_cc.is_none() => {
            fields.engine_cc = locale::parse_integer(value, locale).and_then(|cc| u32::try_from(cc).ok())
        }
        Field::EmissionClass if fields.emission_class.is_none() => fields.emission_class = text(),
        Field::Co2Emissions if fields.co2_emissions.is_none() => {
            fields.co2_emissions = locale::parse_integer(value, locale).and_then(|g| u32::try_from(g).ok())
        }
        Field::Consumption if fields.consumption_combined.is_none() => {
            fields.consumption_combined = locale::parse_decimal(value, locale)
        }
        Field::Gears if fields.gears.is_none() => fields.gears = first_digit(value),
        Field::Drivetrain if fields.drivetrain.is_none() => {
            fields.drivetrain = Some(locale::normalize_drivetrain(value))
        }
        Field::ColorInterior if fields.color_interior.is_none() => fields.color_interior = text(),
        Field::SellerName if fields.seller_name.is_none() => fields.seller_name = text(),
        Field::SellerLocation if fields.seller_location.is_none() => fields.seller_location = text(),
        _ => {}
    }
}

fn small_count(value: &str, locale: NumberLocale) -> Option<u8> {
    locale::parse_integer(value, locale).and_then(|n| u8::try_from(n).ok())
}

fn first_digit(value: &str) -> Option<u8> {
    value.chars().find_map(|c| c.to_digit(10)).map(|d| d as u8)
}

fn collect_equipment(page: &Page<'_>, fields: &mut VehicleFields) {
    for item in page.html.select(&EQUIPMENT_ITEM) {
        let tag = element_text(item);
        if tag.is_empty() || tag.chars().count() > 100 {
            continue;
        }
        let lower = tag.to_lowercase();
        let category = if SAFETY_WORDS.iter().any(|w| lower.contains(w)) {
            "safety"
        } else if COMFORT_WORDS.iter().any(|w| lower.contains(w)) {
            "comfort"
        } else {
            "general"
        };

        let tags = fields.equipment.entry(category.to_string()).or_default();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
}

/// Name and location from the first seller block that has either
fn seller_contact(page: &Page<'_>) -> (Option<String>, Option<String>) {
    let first_text = |block: ElementRef<'_>, selector: &Selector| {
        block
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty() && text.chars().count() <= 120)
    };

    page.html
        .select(&SELLER)
        .map(|block| (first_text(block, &SELLER_NAME), first_text(block, &SELLER_LOCATION)))
        .find(|(name, location)| name.is_some() || location.is_some())
        .unwrap_or((None, None))
}

fn seller_type(page: &Page<'_>) -> Option<SellerType> {
    page.html.select(&SELLER).find_map(|element| {
        let text = element_text(element).to_lowercase();
        if DEALER_WORDS.iter().any(|w| text.contains(w)) {
            Some(SellerType::Dealer)
        } else if PRIVATE_WORDS.iter().any(|w| text.contains(w)) {
            Some(SellerType::Private)
        } else {
            None
        }
    })
}
