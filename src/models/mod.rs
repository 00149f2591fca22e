use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ScrapeError;
use crate::locale::NumberLocale;

const HP_PER_KW: f64 = 1.36;

/// Supported national marketplaces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    De,
    Fr,
    It,
    Be,
}

impl Country {
    pub const ALL: [Country; 4] = [Country::De, Country::Fr, Country::It, Country::Be];

    pub fn code(&self) -> &'static str {
        match self {
            Country::De => "de",
            Country::Fr => "fr",
            Country::It => "it",
            Country::Be => "be",
        }
    }

    pub fn domain(&self) -> &'static str {
        match self {
            Country::De => "www.autoscout24.de",
            Country::Fr => "www.autoscout24.fr",
            Country::It => "www.autoscout24.it",
            Country::Be => "www.autoscout24.be",
        }
    }

    /// Belgium serves the French-language site under `/fr`
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Country::Be => "/fr",
            _ => "",
        }
    }

    /// Localized path segment of a listing detail page
    pub fn detail_path(&self) -> &'static str {
        match self {
            Country::De => "angebote",
            Country::Fr | Country::Be => "offres",
            Country::It => "annunci",
        }
    }

    pub fn accept_language(&self) -> &'static str {
        match self {
            Country::De => "de-DE,de;q=0.9,en;q=0.5",
            Country::Fr => "fr-FR,fr;q=0.9,en;q=0.5",
            Country::It => "it-IT,it;q=0.9,en;q=0.5",
            Country::Be => "fr-BE,fr;q=0.9,nl-BE;q=0.8,en;q=0.5",
        }
    }

    pub fn number_locale(&self) -> NumberLocale {
        match self {
            Country::De => NumberLocale::GERMAN,
            Country::Fr | Country::Be => NumberLocale::FRENCH,
            Country::It => NumberLocale::ITALIAN,
        }
    }

    pub fn currency(&self) -> Currency {
        Currency::Eur
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code().to_uppercase())
    }
}

impl FromStr for Country {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "de" => Ok(Country::De),
            "fr" => Ok(Country::Fr),
            "it" => Ok(Country::It),
            "be" => Ok(Country::Be),
            other => Err(ScrapeError::Validation {
                field: "country",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    New,
    Used,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Petrol,
    Diesel,
    Electric,
    Hybrid,
    PluginHybrid,
    Lpg,
    Cng,
    Hydrogen,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transmission {
    Manual,
    Automatic,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Drivetrain {
    Awd,
    Fwd,
    Rwd,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SellerType {
    Dealer,
    Private,
}

/// Extraction strategy that supplied a field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Structured,
    Table,
    Pattern,
    /// Search-result card, used when the detail page left gaps or failed
    Card,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Structured => "structured",
            Tier::Table => "table",
            Tier::Pattern => "pattern",
            Tier::Card => "card",
        }
    }
}

/// Vehicle fields tracked for provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Make,
    Model,
    Trim,
    Price,
    Condition,
    Year,
    FirstRegistration,
    Mileage,
    FuelType,
    Transmission,
    PowerKw,
    PowerHp,
    EngineCc,
    EmissionClass,
    Co2Emissions,
    Consumption,
    Gears,
    Drivetrain,
    BodyType,
    Color,
    ColorInterior,
    Doors,
    Seats,
    PreviousOwners,
    SellerType,
    SellerName,
    SellerLocation,
    ImageCount,
    Equipment,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Make => "make",
            Field::Model => "model",
            Field::Trim => "trim",
            Field::Price => "price",
            Field::Condition => "condition",
            Field::Year => "year",
            Field::FirstRegistration => "first_registration",
            Field::Mileage => "mileage_km",
            Field::FuelType => "fuel_type",
            Field::Transmission => "transmission",
            Field::PowerKw => "power_kw",
            Field::PowerHp => "power_hp",
            Field::EngineCc => "engine_cc",
            Field::EmissionClass => "emission_class",
            Field::Co2Emissions => "co2_emissions",
            Field::Consumption => "consumption_combined",
            Field::Gears => "gears",
            Field::Drivetrain => "drivetrain",
            Field::BodyType => "body_type",
            Field::Color => "color",
            Field::ColorInterior => "color_interior",
            Field::Doors => "doors",
            Field::Seats => "seats",
            Field::PreviousOwners => "previous_owners",
            Field::SellerType => "seller_type",
            Field::SellerName => "seller_name",
            Field::SellerLocation => "seller_location",
            Field::ImageCount => "image_count",
            Field::Equipment => "equipment",
        }
    }
}

/// Which tier supplied each populated field
pub type Provenance = BTreeMap<Field, Tier>;

/// Equipment tags grouped by category (safety, comfort, general)
pub type Equipment = BTreeMap<String, Vec<String>>;

/// Partial vehicle data produced by one extraction tier.
///
/// Every field is optional; a tier only sets what it found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleFields {
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    /// Whole currency units
    pub price: Option<u64>,
    pub condition: Option<Condition>,
    pub year: Option<i32>,
    pub first_registration: Option<String>,
    pub mileage_km: Option<u64>,
    pub fuel_type: Option<FuelType>,
    pub transmission: Option<Transmission>,
    pub power_kw: Option<u32>,
    pub power_hp: Option<u32>,
    /// Displacement in cm³
    pub engine_cc: Option<u32>,
    /// Euro norm label as printed ("Euro 6d")
    pub emission_class: Option<String>,
    /// g/km
    pub co2_emissions: Option<u32>,
    /// Combined consumption, l/100 km
    pub consumption_combined: Option<f64>,
    pub gears: Option<u8>,
    pub drivetrain: Option<Drivetrain>,
    pub body_type: Option<String>,
    pub color: Option<String>,
    pub color_interior: Option<String>,
    pub doors: Option<u8>,
    pub seats: Option<u8>,
    pub previous_owners: Option<u8>,
    pub seller_type: Option<SellerType>,
    pub seller_name: Option<String>,
    pub seller_location: Option<String>,
    pub image_count: Option<u32>,
    #[serde(serialize_with = "serialize_equipment")]
    pub equipment: Equipment,
}

fn fill_slot<T>(slot: &mut Option<T>, value: Option<T>, field: Field, tier: Tier, provenance: &mut Provenance) {
    if slot.is_none() {
        if let Some(value) = value {
            *slot = Some(value);
            provenance.insert(field, tier);
        }
    }
}

impl VehicleFields {
    pub fn is_empty(&self) -> bool {
        *self == VehicleFields::default()
    }

    /// Gap-filling merge: only fields still missing here are taken from
    /// `other`, and each one taken is tagged with `tier`.
    pub fn fill_gaps(&mut self, other: VehicleFields, tier: Tier, provenance: &mut Provenance) -> usize {
        let before = provenance.len();
        let p = provenance;

        fill_slot(&mut self.make, other.make, Field::Make, tier, p);
        fill_slot(&mut self.model, other.model, Field::Model, tier, p);
        fill_slot(&mut self.trim, other.trim, Field::Trim, tier, p);
        fill_slot(&mut self.price, other.price, Field::Price, tier, p);
        fill_slot(&mut self.condition, other.condition, Field::Condition, tier, p);
        fill_slot(&mut self.year, other.year, Field::Year, tier, p);
        fill_slot(
            &mut self.first_registration,
            other.first_registration,
            Field::FirstRegistration,
            tier,
            p,
        );
        fill_slot(&mut self.mileage_km, other.mileage_km, Field::Mileage, tier, p);
        fill_slot(&mut self.fuel_type, other.fuel_type, Field::FuelType, tier, p);
        fill_slot(&mut self.transmission, other.transmission, Field::Transmission, tier, p);
        fill_slot(&mut self.power_kw, other.power_kw, Field::PowerKw, tier, p);
        fill_slot(&mut self.power_hp, other.power_hp, Field::PowerHp, tier, p);
        fill_slot(&mut self.engine_cc, other.engine_cc, Field::EngineCc, tier, p);
        fill_slot(&mut self.emission_class, other.emission_class, Field::EmissionClass, tier, p);
        fill_slot(&mut self.co2_emissions, other.co2_emissions, Field::Co2Emissions, tier, p);
        fill_slot(
            &mut self.consumption_combined,
            other.consumption_combined,
            Field::Consumption,
            tier,
            p,
        );
        fill_slot(&mut self.gears, other.gears, Field::Gears, tier, p);
        fill_slot(&mut self.drivetrain, other.drivetrain, Field::Drivetrain, tier, p);
        fill_slot(&mut self.body_type, other.body_type, Field::BodyType, tier, p);
        fill_slot(&mut self.color, other.color, Field::Color, tier, p);
        fill_slot(&mut self.color_interior, other.color_interior, Field::ColorInterior, tier, p);
        fill_slot(&mut self.doors, other.doors, Field::Doors, tier, p);
        fill_slot(&mut self.seats, other.seats, Field::Seats, tier, p);
        fill_slot(&mut self.previous_owners, other.previous_owners, Field::PreviousOwners, tier, p);
        fill_slot(&mut self.seller_type, other.seller_type, Field::SellerType, tier, p);
        fill_slot(&mut self.seller_name, other.seller_name, Field::SellerName, tier, p);
        fill_slot(&mut self.seller_location, other.seller_location, Field::SellerLocation, tier, p);
        fill_slot(&mut self.image_count, other.image_count, Field::ImageCount, tier, p);

        if self.equipment.is_empty() && !other.equipment.is_empty() {
            self.equipment = other.equipment;
            p.insert(Field::Equipment, tier);
        }

        p.len() - before
    }

    /// Fields a tier may still contribute to
    pub fn is_missing(&self, field: Field) -> bool {
        match field {
            Field::Make => self.make.is_none(),
            Field::Model => self.model.is_none(),
            Field::Trim => self.trim.is_none(),
            Field::Price => self.price.is_none(),
            Field::Condition => self.condition.is_none(),
            Field::Year => self.year.is_none(),
            Field::FirstRegistration => self.first_registration.is_none(),
            Field::Mileage => self.mileage_km.is_none(),
            Field::FuelType => self.fuel_type.is_none(),
            Field::Transmission => self.transmission.is_none(),
            Field::PowerKw => self.power_kw.is_none(),
            Field::PowerHp => self.power_hp.is_none(),
            Field::EngineCc => self.engine_cc.is_none(),
            Field::EmissionClass => self.emission_class.is_none(),
            Field::Co2Emissions => self.co2_emissions.is_none(),
            Field::Consumption => self.consumption_combined.is_none(),
            Field::Gears => self.gears.is_none(),
            Field::Drivetrain => self.drivetrain.is_none(),
            Field::BodyType => self.body_type.is_none(),
            Field::Color => self.color.is_none(),
            Field::ColorInterior => self.color_interior.is_none(),
            Field::Doors => self.doors.is_none(),
            Field::Seats => self.seats.is_none(),
            Field::PreviousOwners => self.previous_owners.is_none(),
            Field::SellerType => self.seller_type.is_none(),
            Field::SellerName => self.seller_name.is_none(),
            Field::SellerLocation => self.seller_location.is_none(),
            Field::ImageCount => self.image_count.is_none(),
            Field::Equipment => self.equipment.is_empty(),
        }
    }
}

/// Plausibility bounds applied before a record is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_year: i32,
    /// Defaults to next calendar year
    pub max_year: Option<i32>,
    /// Mileage at or below which an unlabelled listing counts as new
    pub new_mileage_threshold_km: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_year: 1990,
            max_year: None,
            new_mileage_threshold_km: 100,
        }
    }
}

impl ValidationConfig {
    pub fn max_year(&self) -> i32 {
        self.max_year.unwrap_or_else(|| Utc::now().year() + 1)
    }
}

/// Core listing data model, one vehicle offer
#[derive(Debug, Clone, Serialize)]
pub struct ListingRecord {
    pub source_id: Option<String>,
    pub listing_url: String,
    pub country: Country,
    pub currency: Currency,
    #[serde(flatten)]
    pub fields: VehicleFields,
    /// Price divided by mileage, two decimals
    pub price_per_km: Option<f64>,
    /// Whole years since first registration, as of `scraped_at`
    pub age_years: Option<i32>,
    #[serde(rename = "extraction_tier", serialize_with = "serialize_provenance")]
    pub provenance: Provenance,
    pub scraped_at: DateTime<Utc>,
}

impl ListingRecord {
    pub fn new(listing_url: impl Into<String>, country: Country) -> Self {
        let listing_url = listing_url.into();
        Self {
            source_id: derive_source_id(&listing_url),
            listing_url,
            country,
            currency: country.currency(),
            fields: VehicleFields::default(),
            price_per_km: None,
            age_years: None,
            provenance: Provenance::new(),
            scraped_at: Utc::now(),
        }
    }

    /// `source_id` when derivable, else the listing URL
    pub fn dedup_key(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.listing_url)
    }

    pub fn make(&self) -> Option<&str> {
        self.fields.make.as_deref()
    }

    pub fn price(&self) -> Option<u64> {
        self.fields.price
    }

    pub fn condition(&self) -> Option<Condition> {
        self.fields.condition
    }

    /// Names of mandatory fields that are still empty
    pub fn missing_mandatory(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.fields.make.as_deref().map_or(true, |m| m.trim().is_empty()) {
            missing.push("make");
        }
        if self.fields.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
            missing.push("model");
        }
        if self.fields.price.is_none() {
            missing.push("price");
        }
        missing
    }

    /// Derive dependent fields once all tiers have run
    pub fn finalize(&mut self, bounds: &ValidationConfig) {
        let f = &mut self.fields;

        if let (Some(kw), None) = (f.power_kw, f.power_hp) {
            f.power_hp = Some((kw as f64 * HP_PER_KW).round() as u32);
        }
        if let (None, Some(hp)) = (f.power_kw, f.power_hp) {
            f.power_kw = Some((hp as f64 / HP_PER_KW).round() as u32);
        }

        if f.condition.is_none() {
            if let Some(km) = f.mileage_km {
                f.condition = Some(if km <= bounds.new_mileage_threshold_km {
                    Condition::New
                } else {
                    Condition::Used
                });
            }
        }

        if let Some(make) = f.make.take() {
            f.make = Some(crate::locale::normalize_make(&make));
        }

        self.price_per_km = match (f.price, f.mileage_km) {
            (Some(price), Some(km)) if km > 0 => Some((price as f64 / km as f64 * 100.0).round() / 100.0),
            _ => None,
        };

        let registered = f
            .first_registration
            .as_deref()
            .and_then(crate::locale::parse_year)
            .or(f.year);
        self.age_years = registered.map(|year| self.scraped_at.year() - year);
    }

    /// Null out implausible values. Returns one error per nulled field.
    pub fn validate(&mut self, bounds: &ValidationConfig) -> Vec<ScrapeError> {
        let mut errors = Vec::new();
        let f = &mut self.fields;

        if let Some(year) = f.year {
            if year < bounds.min_year || year > bounds.max_year() {
                errors.push(ScrapeError::Validation {
                    field: "year",
                    value: year.to_string(),
                });
                f.year = None;
                self.provenance.remove(&Field::Year);
            }
        }

        if f.mileage_km == Some(0) && f.condition == Some(Condition::Used) {
            errors.push(ScrapeError::Validation {
                field: "mileage_km",
                value: "0 on a used vehicle".to_string(),
            });
            f.mileage_km = None;
            self.provenance.remove(&Field::Mileage);
        }

        errors
    }
}

/// Stable per-listing key from the listing URL: the site's UUID when
/// present, else host, path and query with the fragment and trailing
/// slash dropped.
pub fn derive_source_id(listing_url: &str) -> Option<String> {
    let parsed = url::Url::parse(listing_url).ok()?;
    let path = parsed.path();

    if let Some(uuid) = crate::locale::find_uuid(path) {
        return Some(uuid.to_string());
    }

    let host = parsed.host_str()?;
    let mut key = format!("{}{}", host, path.trim_end_matches('/'));
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        key.push('?');
        key.push_str(query);
    }
    Some(key)
}

fn serialize_equipment<S: Serializer>(equipment: &Equipment, serializer: S) -> Result<S::Ok, S::Error> {
    let flat = equipment
        .iter()
        .map(|(category, tags)| format!("{}={}", category, tags.join("|")))
        .collect::<Vec<_>>()
        .join(";");
    serializer.serialize_str(&flat)
}

fn serialize_provenance<S: Serializer>(provenance: &Provenance, serializer: S) -> Result<S::Ok, S::Error> {
    let flat = provenance
        .iter()
        .map(|(field, tier)| format!("{}={}", field.as_str(), tier.as_str()))
        .collect::<Vec<_>>()
        .join(";");
    serializer.serialize_str(&flat)
}
