//! Locale-aware field normalization
//!
//! Pure functions turning locale-formatted text ("45.000 km", "25 900 €",
//! "Schaltgetriebe") into canonical values, plus the per-country label
//! dictionaries used by the table tier.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Condition, Country, Drivetrain, Field, FuelType, Transmission};

/// Digit grouping and decimal conventions of a locale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberLocale {
    pub thousands: &'static [char],
    pub decimal: char,
}

impl NumberLocale {
    /// `45.000`, `1,6`
    pub const GERMAN: NumberLocale = NumberLocale {
        thousands: &['.', '\''],
        decimal: ',',
    };
    /// `45 000` with plain, non-breaking or narrow non-breaking spaces; dots also occur
    pub const FRENCH: NumberLocale = NumberLocale {
        thousands: &[' ', '\u{a0}', '\u{202f}', '.'],
        decimal: ',',
    };
    pub const ITALIAN: NumberLocale = NumberLocale {
        thousands: &['.'],
        decimal: ',',
    };
    /// `45,000`, `1.6`
    pub const ENGLISH: NumberLocale = NumberLocale {
        thousands: &[','],
        decimal: '.',
    };
}

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid regex")
});
static KW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,4})\s*kw\b").expect("valid regex"));
static HP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,4})\s*(?:ps|hp|ch|cv)\b").expect("valid regex"));
static MONTH_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}\s*[/.-]\s*((?:19|20)\d{2})\b").expect("valid regex"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid regex"));

/// Integer digits and optional fraction digits of the first number in `text`
fn scan_number(text: &str, locale: NumberLocale) -> Option<(String, Option<String>)> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;

    let mut integer = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            integer.push(c);
            i += 1;
            continue;
        }
        // A group separator only counts when followed by exactly three digits
        if locale.thousands.contains(&c) && !integer.is_empty() {
            let group_end = i + 4;
            let group_ok = group_end <= chars.len()
                && chars[i + 1..group_end].iter().all(|d| d.is_ascii_digit())
                && chars.get(group_end).map_or(true, |d| !d.is_ascii_digit());
            if group_ok {
                i += 1;
                continue;
            }
        }
        break;
    }

    let mut fraction = None;
    if i + 1 < chars.len() && chars[i] == locale.decimal && chars[i + 1].is_ascii_digit() {
        let digits: String = chars[i + 1..].iter().take_while(|d| d.is_ascii_digit()).collect();
        fraction = Some(digits);
    }

    Some((integer, fraction))
}

/// First integer in `text`, honouring the locale's grouping; any decimal
/// part is dropped.
pub fn parse_integer(text: &str, locale: NumberLocale) -> Option<u64> {
    let (integer, _) = scan_number(text, locale)?;
    integer.parse().ok()
}

pub fn parse_decimal(text: &str, locale: NumberLocale) -> Option<f64> {
    let (integer, fraction) = scan_number(text, locale)?;
    let literal = match fraction {
        Some(fraction) => format!("{}.{}", integer, fraction),
        None => integer,
    };
    literal.parse().ok()
}

/// Price in whole currency units. Negative amounts are rejected.
pub fn parse_price(text: &str, locale: NumberLocale) -> Option<u64> {
    let cleaned = text.replace('€', " ").replace("EUR", " ");
    let trimmed = cleaned.trim_start();
    if trimmed.starts_with('-') {
        return None;
    }
    parse_integer(trimmed, locale)
}

/// Kilowatts and horsepower from text like "110 kW (150 PS)" or "150 ch"
pub fn parse_power(text: &str) -> (Option<u32>, Option<u32>) {
    let kw = KW_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    let hp = HP_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    (kw, hp)
}

/// Registration year from "07/2019", "07-2019" or a bare year
pub fn parse_year(text: &str) -> Option<i32> {
    if let Some(c) = MONTH_YEAR_RE.captures(text) {
        return c.get(1)?.as_str().parse().ok();
    }
    YEAR_RE.captures(text)?.get(1)?.as_str().parse().ok()
}

pub fn find_uuid(text: &str) -> Option<&str> {
    UUID_RE.find(text).map(|m| m.as_str())
}

const FUEL_VOCABULARY: &[(&str, FuelType)] = &[
    ("plug-in", FuelType::PluginHybrid),
    ("rechargeable", FuelType::PluginHybrid),
    ("elektro/benzin", FuelType::Hybrid),
    ("elektro/diesel", FuelType::Hybrid),
    ("hybri", FuelType::Hybrid),
    ("ibrid", FuelType::Hybrid),
    ("elektr", FuelType::Electric),
    ("électrique", FuelType::Electric),
    ("elettric", FuelType::Electric),
    ("electric", FuelType::Electric),
    ("diesel", FuelType::Diesel),
    ("gasolio", FuelType::Diesel),
    ("benzin", FuelType::Petrol),
    ("super", FuelType::Petrol),
    ("essence", FuelType::Petrol),
    ("benzina", FuelType::Petrol),
    ("gasoline", FuelType::Petrol),
    ("petrol", FuelType::Petrol),
    ("lpg", FuelType::Lpg),
    ("gpl", FuelType::Lpg),
    ("autogas", FuelType::Lpg),
    ("cng", FuelType::Cng),
    ("erdgas", FuelType::Cng),
    ("metano", FuelType::Cng),
    ("gaz naturel", FuelType::Cng),
    ("wasserstoff", FuelType::Hydrogen),
    ("hydrogène", FuelType::Hydrogen),
    ("idrogeno", FuelType::Hydrogen),
    ("hydrogen", FuelType::Hydrogen),
];

/// Map a localized fuel label to the canonical set; unmapped values land
/// in `Unknown`.
pub fn normalize_fuel(raw: &str) -> FuelType {
    let value = raw.trim().to_lowercase();
    FUEL_VOCABULARY
        .iter()
        .find(|(needle, _)| value.contains(needle))
        .map(|(_, fuel)| *fuel)
        .unwrap_or(FuelType::Unknown)
}

pub fn normalize_transmission(raw: &str) -> Transmission {
    let value = raw.trim().to_lowercase();
    if value.contains("auto") {
        Transmission::Automatic
    } else if ["schalt", "manu", "mécanique"].iter().any(|w| value.contains(w)) {
        Transmission::Manual
    } else {
        Transmission::Unknown
    }
}

pub fn normalize_drivetrain(raw: &str) -> Drivetrain {
    let value: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    const ALL_WHEEL: &[&str] = &["allrad", "4x4", "awd", "4wd", "integrale", "intégrale", "allwheel", "fourwheel"];
    const REAR: &[&str] = &["hinterrad", "propulsion", "rwd", "posteriore", "rear"];
    const FRONT: &[&str] = &["vorderrad", "traction", "fwd", "anteriore", "front"];

    if ALL_WHEEL.iter().any(|w| value.contains(w)) {
        Drivetrain::Awd
    } else if REAR.iter().any(|w| value.contains(w)) {
        Drivetrain::Rwd
    } else if FRONT.iter().any(|w| value.contains(w)) {
        Drivetrain::Fwd
    } else {
        Drivetrain::Unknown
    }
}

pub fn normalize_condition(raw: &str) -> Option<Condition> {
    let value = raw.trim().to_lowercase();
    const USED: &[&str] = &["used", "gebraucht", "occasion", "usato", "usata", "jahreswagen", "vorführ"];
    const NEW: &[&str] = &["new", "neu", "neuf", "neuve", "nuovo", "nuova"];

    if USED.iter().any(|w| value.contains(w)) {
        Some(Condition::Used)
    } else if NEW.iter().any(|w| value.contains(w)) {
        Some(Condition::New)
    } else {
        None
    }
}

const MAKE_ALIASES: &[(&str, &str)] = &[
    ("mercedes-benz", "Mercedes-Benz"),
    ("mercedes", "Mercedes-Benz"),
    ("bmw", "BMW"),
    ("vw", "Volkswagen"),
    ("volkswagen", "Volkswagen"),
    ("alfa-romeo", "Alfa Romeo"),
    ("alfa romeo", "Alfa Romeo"),
    ("land-rover", "Land Rover"),
    ("land rover", "Land Rover"),
    ("rolls-royce", "Rolls-Royce"),
    ("rolls royce", "Rolls-Royce"),
    ("aston-martin", "Aston Martin"),
    ("aston martin", "Aston Martin"),
    ("mini", "MINI"),
    ("ds", "DS"),
];

/// Canonical spelling of a make ("vw" -> "Volkswagen", "AUDI" -> "Audi")
pub fn normalize_make(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    if let Some((_, canonical)) = MAKE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return canonical.to_string();
    }

    key.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

const GERMAN_LABELS: &[(&str, Field)] = &[
    ("marke", Field::Make),
    ("modell", Field::Model),
    ("version", Field::Trim),
    ("preis", Field::Price),
    ("kilometerstand", Field::Mileage),
    ("erstzulassung", Field::FirstRegistration),
    ("kraftstoffart", Field::FuelType),
    ("kraftstoff", Field::FuelType),
    ("leistung", Field::PowerKw),
    ("getriebe", Field::Transmission),
    ("getriebeart", Field::Transmission),
    ("karosserieform", Field::BodyType),
    ("karosserie", Field::BodyType),
    ("türen", Field::Doors),
    ("sitzplätze", Field::Seats),
    ("sitze", Field::Seats),
    ("außenfarbe", Field::Color),
    ("farbe", Field::Color),
    ("vorbesitzer", Field::PreviousOwners),
    ("fahrzeughalter", Field::PreviousOwners),
    ("zustand", Field::Condition),
    ("fahrzeugzustand", Field::Condition),
    ("hubraum", Field::EngineCc),
    ("schadstoffklasse", Field::EmissionClass),
    ("co₂-emissionen", Field::Co2Emissions),
    ("co2-emissionen", Field::Co2Emissions),
    ("verbrauch", Field::Consumption),
    ("kraftstoffverbrauch", Field::Consumption),
    ("gänge", Field::Gears),
    ("antrieb", Field::Drivetrain),
    ("antriebsart", Field::Drivetrain),
    ("innenfarbe", Field::ColorInterior),
    ("standort", Field::SellerLocation),
];

const FRENCH_LABELS: &[(&str, Field)] = &[
    ("marque", Field::Make),
    ("modèle", Field::Model),
    ("version", Field::Trim),
    ("prix", Field::Price),
    ("kilométrage", Field::Mileage),
    ("première immatriculation", Field::FirstRegistration),
    ("année", Field::FirstRegistration),
    ("carburant", Field::FuelType),
    ("énergie", Field::FuelType),
    ("puissance", Field::PowerKw),
    ("boîte de vitesse", Field::Transmission),
    ("boîte", Field::Transmission),
    ("carrosserie", Field::BodyType),
    ("portes", Field::Doors),
    ("sièges", Field::Seats),
    ("places", Field::Seats),
    ("couleur", Field::Color),
    ("propriétaires précédents", Field::PreviousOwners),
    ("propriétaires", Field::PreviousOwners),
    ("état", Field::Condition),
    ("cylindrée", Field::EngineCc),
    ("norme antipollution", Field::EmissionClass),
    ("classe d'émission", Field::EmissionClass),
    ("émissions co₂", Field::Co2Emissions),
    ("émissions co2", Field::Co2Emissions),
    ("consommation", Field::Consumption),
    ("rapports", Field::Gears),
    ("transmission", Field::Drivetrain),
    ("couleur intérieure", Field::ColorInterior),
    ("localisation", Field::SellerLocation),
];

const ITALIAN_LABELS: &[(&str, Field)] = &[
    ("marca", Field::Make),
    ("modello", Field::Model),
    ("versione", Field::Trim),
    ("prezzo", Field::Price),
    ("chilometraggio", Field::Mileage),
    ("prima immatricolazione", Field::FirstRegistration),
    ("immatricolazione", Field::FirstRegistration),
    ("carburante", Field::FuelType),
    ("combustibile", Field::FuelType),
    ("alimentazione", Field::FuelType),
    ("potenza", Field::PowerKw),
    ("cambio", Field::Transmission),
    ("carrozzeria", Field::BodyType),
    ("porte", Field::Doors),
    ("posti", Field::Seats),
    ("colore", Field::Color),
    ("proprietari precedenti", Field::PreviousOwners),
    ("proprietari", Field::PreviousOwners),
    ("stato", Field::Condition),
    ("condizioni", Field::Condition),
    ("cilindrata", Field::EngineCc),
    ("classe di emissione", Field::EmissionClass),
    ("classe emissioni", Field::EmissionClass),
    ("emissioni co₂", Field::Co2Emissions),
    ("emissioni co2", Field::Co2Emissions),
    ("consumo", Field::Consumption),
    ("consumo di carburante", Field::Consumption),
    ("marce", Field::Gears),
    ("trazione", Field::Drivetrain),
    ("colore interni", Field::ColorInterior),
    ("ubicazione", Field::SellerLocation),
];

const ENGLISH_LABELS: &[(&str, Field)] = &[
    ("make", Field::Make),
    ("model", Field::Model),
    ("price", Field::Price),
    ("mileage", Field::Mileage),
    ("first registration", Field::FirstRegistration),
    ("fuel type", Field::FuelType),
    ("fuel", Field::FuelType),
    ("power", Field::PowerKw),
    ("gearbox", Field::Transmission),
    ("transmission", Field::Transmission),
    ("body type", Field::BodyType),
    ("doors", Field::Doors),
    ("seats", Field::Seats),
    ("colour", Field::Color),
    ("color", Field::Color),
    ("previous owners", Field::PreviousOwners),
    ("condition", Field::Condition),
    ("engine size", Field::EngineCc),
    ("displacement", Field::EngineCc),
    ("emission class", Field::EmissionClass),
    ("co₂ emissions", Field::Co2Emissions),
    ("co2 emissions", Field::Co2Emissions),
    ("fuel consumption", Field::Consumption),
    ("gears", Field::Gears),
    ("drivetrain", Field::Drivetrain),
    ("drive type", Field::Drivetrain),
    ("interior colour", Field::ColorInterior),
    ("interior color", Field::ColorInterior),
    ("location", Field::SellerLocation),
];

/// Labels that contain a dictionary key but describe something else
const IGNORED_LABELS: &[&str] = &[
    "stromverbrauch",
    "consommation électrique",
    "consumo elettrico",
    "electric consumption",
    "co₂-effizienz",
    "co2-effizienz",
];

/// Label dictionaries consulted for a country, most specific first
pub fn label_dictionaries(country: Country) -> [&'static [(&'static str, Field)]; 2] {
    match country {
        Country::De => [GERMAN_LABELS, ENGLISH_LABELS],
        Country::Fr | Country::Be => [FRENCH_LABELS, ENGLISH_LABELS],
        Country::It => [ITALIAN_LABELS, ENGLISH_LABELS],
    }
}

/// Map a specification-table label to a canonical field: exact match
/// first, then the longest dictionary key contained in the label.
pub fn canonical_field(label: &str, country: Country) -> Option<Field> {
    let label = label.trim().trim_end_matches(':').trim().to_lowercase();
    if label.is_empty() || IGNORED_LABELS.iter().any(|ignored| label.contains(ignored)) {
        return None;
    }

    let dictionaries = label_dictionaries(country);

    for dictionary in dictionaries {
        if let Some((_, field)) = dictionary.iter().find(|(key, _)| *key == label) {
            return Some(*field);
        }
    }

    dictionaries
        .iter()
        .flat_map(|dictionary| dictionary.iter())
        .filter(|(key, _)| label.contains(key))
        .max_by_key(|(key, _)| key.chars().count())
        .map(|(_, field)| *field)
}
