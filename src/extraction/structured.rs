//! Structured-data tier: schema.org Car/Product/Vehicle JSON-LD

use regex::Regex;
use scraper::Selector;
use serde_json::Value;
use std::sync::LazyLock;

use super::Page;
use crate::locale::{self, NumberLocale};
use crate::models::{SellerType, VehicleFields};

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector"));
/// "45.000": dot-grouped thousands with no decimal part
static DOT_GROUPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(?:\.\d{3})+$").expect("valid regex"));

const VEHICLE_TYPES: &[&str] = &["Car", "Vehicle", "Product", "MotorizedBicycle", "Motorcycle"];

const KM_PER_MILE: f64 = 1.609_344;

const DEALER_TYPES: &[&str] = &["AutoDealer", "AutomotiveBusiness", "Organization", "LocalBusiness"];

pub fn extract(page: &Page<'_>, _current: &VehicleFields) -> VehicleFields {
    let Some(node) = find_vehicle_node(page) else {
        return VehicleFields::default();
    };
    from_json_ld(&node, page.country.number_locale())
}

/// First JSON-LD object typed as a vehicle or product, searching arrays
/// and `@graph` containers
fn find_vehicle_node(page: &Page<'_>) -> Option<Value> {
    page.html.select(&LD_JSON).find_map(|script| {
        let raw = script.text().collect::<String>();
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        find_typed(&value).cloned()
    })
}

fn find_typed(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_typed),
        Value::Object(map) => {
            if is_vehicle_type(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_typed)
        }
        _ => None,
    }
}

fn is_vehicle_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => VEHICLE_TYPES.contains(&s.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|k| k.as_str().map_or(false, |s| VEHICLE_TYPES.contains(&s))),
        _ => false,
    }
}

/// Text of a scalar, or of an object's `name`
fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => return map.get("name").and_then(text_of),
        Value::Array(items) => return items.first().and_then(text_of),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Number from a JSON number or a numeric string. Plain literals
/// ("24900", "24900.00", "1.6") parse as-is; "45.000" and "45 000" follow
/// the page's grouping convention.
fn number_of(value: &Value, locale: NumberLocale) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('-') {
                return None;
            }
            let grouped = locale.thousands.contains(&'.') && DOT_GROUPED.is_match(trimmed);
            match trimmed.parse::<f64>() {
                Ok(n) if !grouped => Some(n),
                _ => locale::parse_decimal(trimmed, locale),
            }
        }
        Value::Object(map) => map.get("value").and_then(|v| number_of(v, locale)),
        _ => None,
    }
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// `model` without a leading repeat of `make`, compared char by char
/// case-insensitively
fn strip_make(model: &str, make: &str) -> String {
    let mut rest = model.chars();
    for expected in make.chars() {
        match rest.next() {
            Some(c) if c.to_lowercase().eq(expected.to_lowercase()) => {}
            _ => return model.trim().to_string(),
        }
    }
    let rest = rest.as_str();
    // "Golf" must not lose its head to make "Go"
    if rest.starts_with(|c: char| c.is_alphanumeric()) {
        return model.trim().to_string();
    }
    rest.trim().to_string()
}

fn first_of(value: Option<&Value>) -> Option<&Value> {
    match value {
        Some(Value::Array(items)) => items.first(),
        other => other,
    }
}

fn from_json_ld(node: &Value, locale: NumberLocale) -> VehicleFields {
    let number = |value: &Value| number_of(value, locale);
    let mut fields = VehicleFields::default();

    fields.make = node
        .get("brand")
        .or_else(|| node.get("manufacturer"))
        .and_then(text_of);

    if let Some(model) = node.get("model").and_then(text_of) {
        let stripped = match &fields.make {
            Some(make) => strip_make(&model, make),
            None => model,
        };
        fields.model = (!stripped.is_empty()).then_some(stripped);
    }

    fields.trim = node.get("vehicleConfiguration").and_then(text_of);

    if let Some(offer) = first_of(node.get("offers")) {
        let price = offer
            .get("price")
            .or_else(|| offer.get("priceSpecification").and_then(|spec| spec.get("price")));
        fields.price = non_negative(price.and_then(number)).map(|p| p as u64);
        fields.condition = offer
            .get("itemCondition")
            .and_then(text_of)
            .and_then(|c| locale::normalize_condition(&c));
        if let Some(seller) = first_of(offer.get("seller").or_else(|| offer.get("offeredBy"))) {
            apply_seller(&mut fields, seller);
        }
    }

    if let Some(odometer) = node.get("mileageFromOdometer") {
        let km = non_negative(number(odometer)).map(|value| {
            let unit = odometer.get("unitCode").and_then(Value::as_str).unwrap_or("KMT");
            if unit.eq_ignore_ascii_case("SMI") {
                value * KM_PER_MILE
            } else {
                value
            }
        });
        fields.mileage_km = km.map(|km| km.round() as u64);
    }

    if let Some(condition) = node.get("itemCondition").and_then(text_of) {
        fields.condition = locale::normalize_condition(&condition).or(fields.condition);
    }

    fields.fuel_type = node
        .get("fuelType")
        .and_then(text_of)
        .map(|f| locale::normalize_fuel(&f));
    fields.transmission = node
        .get("vehicleTransmission")
        .and_then(text_of)
        .map(|t| locale::normalize_transmission(&t));

    let engine = first_of(node.get("vehicleEngine"));
    if let Some(power) = engine.and_then(|e| e.get("enginePower")) {
        apply_engine_power(&mut fields, power, locale);
    }
    if let Some(displacement) = engine.and_then(|e| e.get("engineDisplacement")) {
        let unit = displacement.get("unitCode").and_then(Value::as_str).unwrap_or("CMQ");
        fields.engine_cc = non_negative(number(displacement)).map(|value| {
            if unit.eq_ignore_ascii_case("LTR") {
                (value * 1000.0).round() as u32
            } else {
                value.round() as u32
            }
        });
    }

    fields.consumption_combined = node
        .get("fuelConsumption")
        .and_then(number)
        .filter(|l| *l > 0.0 && *l < 50.0);
    fields.co2_emissions = non_negative(node.get("emissionsCO2").and_then(number)).map(|g| g.round() as u32);
    fields.emission_class = node.get("meetsEmissionStandard").and_then(text_of);
    fields.gears = node
        .get("numberOfForwardGears")
        .and_then(number)
        .map(|g| g as u8);
    fields.drivetrain = node
        .get("driveWheelConfiguration")
        .and_then(text_of)
        .map(|d| locale::normalize_drivetrain(&d));

    let registration = ["dateVehicleFirstRegistered", "productionDate", "vehicleModelDate"]
        .iter()
        .find_map(|key| node.get(*key).and_then(text_of));
    if let Some(registration) = registration {
        fields.year = locale::parse_year(&registration);
        fields.first_registration = Some(registration);
    }

    fields.body_type = node.get("bodyType").and_then(text_of);
    fields.color = node.get("color").and_then(text_of);
    fields.color_interior = node.get("vehicleInteriorColor").and_then(text_of);
    fields.doors = node
        .get("numberOfDoors")
        .and_then(number)
        .map(|d| d as u8);
    fields.seats = node
        .get("seatingCapacity")
        .and_then(number)
        .map(|s| s as u8);
    fields.previous_owners = node
        .get("numberOfPreviousOwners")
        .and_then(number)
        .map(|o| o as u8);

    fields.image_count = match node.get("image") {
        Some(Value::Array(images)) => Some(images.len() as u32),
        Some(Value::String(_)) | Some(Value::Object(_)) => Some(1),
        _ => None,
    };

    fields
}

fn apply_seller(fields: &mut VehicleFields, seller: &Value) {
    fields.seller_name = seller.get("name").and_then(text_of);
    fields.seller_location = seller.get("address").and_then(|address| match address {
        Value::Object(map) => map
            .get("addressLocality")
            .or_else(|| map.get("postalCode"))
            .and_then(text_of),
        other => text_of(other),
    });
    fields.seller_type = match seller.get("@type").and_then(Value::as_str) {
        Some("Person") => Some(SellerType::Private),
        Some(kind) if DEALER_TYPES.contains(&kind) => Some(SellerType::Dealer),
        _ => None,
    };
}

fn apply_engine_power(fields: &mut VehicleFields, power: &Value, locale: NumberLocale) {
    match power {
        Value::Object(map) => {
            let Some(value) = non_negative(power.get("value").and_then(|v| number_of(v, locale))) else {
                return;
            };
            let unit = map.get("unitCode").and_then(Value::as_str).unwrap_or("KWT");
            if unit.eq_ignore_ascii_case("BHP") || unit.eq_ignore_ascii_case("HP") {
                fields.power_hp = Some(value as u32);
            } else {
                fields.power_kw = Some(value as u32);
            }
        }
        Value::Array(items) => {
            for item in items {
                apply_engine_power(fields, item, locale);
            }
        }
        other => {
            if let Some(text) = text_of(other) {
                let (kw, hp) = locale::parse_power(&text);
                fields.power_kw = fields.power_kw.or(kw);
                fields.power_hp = fields.power_hp.or(hp);
            }
        }
    }
}
