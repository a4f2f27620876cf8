//! Statically declared schema: collections, searchable and filterable fields, distinct-field
//! paths and typed response records.

use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{GatewayError, Result};
use crate::query::{SortSpec, set_path};
use crate::utils::num::{bson_as_f64, bson_as_i64};

pub const UNIVERSITIES: &str = "universities";
pub const CITIES: &str = "cities";
pub const REVIEWS: &str = "reviews";
pub const FEEDBACK: &str = "feedback";

/// Fields a free-text token is matched against.
pub const SEARCHABLE_FIELDS: [&str; 3] = ["name", "country", "city"];

/// Fields the typed condition filter may reference.
pub const FILTERABLE_FIELDS: &[&str] = &[
    "_id",
    "name",
    "country",
    "city",
    "city_name",
    "city_id",
    "url",
    "website",
    "createdAt",
    "votes",
    "times_rank",
    "size",
    "academics",
    "sport",
    "social",
    "party",
    "review_count",
    "experience_rating.value",
    "experience_rating.count",
    "workload.value",
    "side_jobs_rating.value",
    "cost_of_beer.value",
    "cost_of_frozen_pizza.value",
    "cost_of_coffee.value",
    "cost_of_rent.value",
    "languages.name",
    "area_of_study.name",
    "most_popular_activities.name",
    "three_words_experience.name",
    "reviews._id",
    "reviews.votes",
    "university_id",
    "platform",
    "date_submit",
];

/// The primary entity kinds; each owns one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    University,
    City,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::University, Self::City];

    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::University => UNIVERSITIES,
            Self::City => CITIES,
        }
    }

    /// Default listing order: universities by name, cities by best experience first.
    #[must_use]
    pub fn default_sort(self) -> SortSpec {
        match self {
            Self::University => SortSpec::asc("name"),
            Self::City => SortSpec::desc("experience_rating.value"),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::University => "university",
            Self::City => "city",
        })
    }
}

impl FromStr for EntityKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "university" | "universities" | "uni" => Ok(Self::University),
            "city" | "cities" => Ok(Self::City),
            other => Err(GatewayError::MalformedSpecification(format!("unknown collection type '{other}'"))),
        }
    }
}

/// Where reviews live. Exactly one layout is active per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewLayout {
    /// A `reviews` array inside each entity document.
    #[default]
    Embedded,
    /// A separate `reviews` collection keyed by `university_id`.
    Standalone,
}

impl FromStr for ReviewLayout {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "standalone" => Ok(Self::Standalone),
            other => Err(GatewayError::Config(format!("unknown review layout '{other}'"))),
        }
    }
}

/// Facets with a distinct-values listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistinctField {
    Country,
    Language,
    Discipline,
}

impl DistinctField {
    pub const ALL: [Self; 3] = [Self::Country, Self::Language, Self::Discipline];

    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Language => "languages.name",
            Self::Discipline => "area_of_study.name",
        }
    }
}

impl FromStr for DistinctField {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "country" | "countries" => Ok(Self::Country),
            "language" | "languages" => Ok(Self::Language),
            "discipline" | "disciplines" | "area_of_study" => Ok(Self::Discipline),
            other => Err(GatewayError::MalformedSpecification(format!("unknown distinct field '{other}'"))),
        }
    }
}

/// The collections a listing may target under a given layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub review_layout: ReviewLayout,
}

impl Schema {
    #[must_use]
    pub const fn new(review_layout: ReviewLayout) -> Self {
        Self { review_layout }
    }

    /// Collections readable through `list_entities`.
    #[must_use]
    pub fn listable_collections(&self) -> Vec<&'static str> {
        let mut out = vec![UNIVERSITIES, CITIES];
        if self.review_layout == ReviewLayout::Standalone {
            out.push(REVIEWS);
        }
        out
    }

    /// Resolve a collection name declared in the schema.
    ///
    /// # Errors
    /// Returns `MalformedSpecification` for an undeclared collection.
    pub fn resolve_collection(&self, name: &str) -> Result<&'static str> {
        self.listable_collections()
            .into_iter()
            .find(|c| *c == name)
            .ok_or_else(|| GatewayError::MalformedSpecification(format!("unknown collection '{name}'")))
    }

    #[must_use]
    pub fn is_filterable(field: &str) -> bool {
        FILTERABLE_FIELDS.contains(&field)
    }

    /// Startup consistency checks.
    ///
    /// # Errors
    /// Returns `Config` describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        for f in SEARCHABLE_FIELDS {
            if !Self::is_filterable(f) {
                return Err(GatewayError::Config(format!("searchable field '{f}' is not filterable")));
            }
        }
        for d in DistinctField::ALL {
            let mut probe = BsonDocument::new();
            set_path(&mut probe, d.path(), Bson::Null)
                .map_err(|e| GatewayError::Config(format!("distinct path {}: {e}", d.path())))?;
            if !Self::is_filterable(d.path()) {
                return Err(GatewayError::Config(format!("distinct path '{}' is not filterable", d.path())));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for c in self.listable_collections().into_iter().chain([FEEDBACK]) {
            if !seen.insert(c) {
                return Err(GatewayError::Config(format!("collection '{c}' declared twice")));
            }
        }
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(ReviewLayout::default())
    }
}

fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(Option::<Bson>::deserialize(d)?.and_then(|b| match &b {
        Bson::String(s) => s.trim().parse().ok(),
        other => bson_as_i64(other),
    }))
}

fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(Option::<Bson>::deserialize(d)?.and_then(|b| match &b {
        Bson::String(s) => s.trim().parse().ok(),
        other => bson_as_f64(other),
    }))
}

fn scalar_string(b: Bson) -> Option<String> {
    match b {
        Bson::String(s) => Some(s),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::DateTime(dt) => dt.try_to_rfc3339_string().ok(),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        Bson::Double(f) => Some(f.to_string()),
        Bson::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text fields stored inconsistently (numbers, dates, ids) read as strings.
fn opt_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Bson>::deserialize(d)?.and_then(scalar_string))
}

/// Multi-select answers: an array, or a single scalar from older submissions.
/// Elements that are not scalars are dropped.
fn string_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<Bson>::deserialize(d)? {
        Some(Bson::Array(items)) => items.into_iter().filter_map(scalar_string).collect(),
        Some(other) => scalar_string(other).into_iter().collect(),
        None => Vec::new(),
    })
}

/// Running average with its sample size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(default, deserialize_with = "opt_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    #[serde(default, deserialize_with = "opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(rename = "_id", default, deserialize_with = "opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub description_city_life: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub three_words_experience: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub area_of_study: Vec<String>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub flagship_university_area_of_study: Vec<String>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub experience_rating: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub workload: Option<f64>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub university_fees: Option<String>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub side_jobs_opportunities: Option<String>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub party_opportunities: Option<String>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub side_jobs_rating: Option<f64>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub integration_opportunities: Option<String>,
    #[serde(default, deserialize_with = "opt_string", skip_serializing_if = "Option::is_none")]
    pub cultural_opportunities: Option<String>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub other_regions_visited: Vec<String>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub most_popular_activities: Vec<String>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub cost_of_beer: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub cost_of_frozen_pizza: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub cost_of_coffee: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64", skip_serializing_if = "Option::is_none")]
    pub cost_of_rent: Option<f64>,
    #[serde(default, deserialize_with = "opt_string")]
    pub platform: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub referer: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub votes: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    pub date_submit: Option<String>,
}

/// A university or city as returned by listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "_id", default, deserialize_with = "opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub city_name: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub city_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub website: Option<String>,
    #[serde(rename = "createdAt", default, deserialize_with = "opt_string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub votes: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub times_rank: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub academics: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub sport: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub social: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub party: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub review_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_rating: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_jobs_rating: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_beer: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_frozen_pizza: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_coffee: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_rent: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<TagCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub area_of_study: Vec<TagCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub most_popular_activities: Vec<TagCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub three_words_experience: Vec<TagCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<ReviewRecord>>,
}

/// A listed record: an entity, or a review when the standalone reviews collection is listed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListedRecord {
    Entity(Box<EntityRecord>),
    Review(ReviewRecord),
}

impl ListedRecord {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Entity(e) => e.id.as_deref(),
            Self::Review(r) => r.id.as_deref(),
        }
    }

    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRecord> {
        match self {
            Self::Entity(e) => Some(e.as_ref()),
            Self::Review(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub unis_count: i64,
    pub review_count: i64,
}

/// Echo of a vote update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAck {
    #[serde(rename = "_id")]
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_review_id: Option<String>,
    pub votes: i64,
    pub collection_type: EntityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn default_schema_validates() {
        Schema::default().validate().unwrap();
        Schema::new(ReviewLayout::Standalone).validate().unwrap();
    }

    #[test]
    fn reviews_collection_only_in_standalone_layout() {
        assert!(Schema::new(ReviewLayout::Embedded).resolve_collection(REVIEWS).is_err());
        assert_eq!(Schema::new(ReviewLayout::Standalone).resolve_collection(REVIEWS).unwrap(), REVIEWS);
        assert!(Schema::default().resolve_collection("users").is_err());
    }

    #[test]
    fn parses_kinds_and_fields() {
        assert_eq!("Universities".parse::<EntityKind>().unwrap(), EntityKind::University);
        assert_eq!("city".parse::<EntityKind>().unwrap(), EntityKind::City);
        assert!("town".parse::<EntityKind>().is_err());
        assert_eq!("language".parse::<DistinctField>().unwrap().path(), "languages.name");
        assert_eq!("discipline".parse::<DistinctField>().unwrap().path(), "area_of_study.name");
    }

    #[test]
    fn entity_record_decodes_leniently() {
        let d = doc! {
            "_id": "u1", "name": "TU Wien", "votes": 4.0, "times_rank": "12", "city_id": 7,
            "experience_rating": { "value": 4, "count": 2 },
            "languages": [ { "name": "German", "count": 3 } ],
            "reviews": [ { "_id": "r1", "votes": 2 } ],
        };
        let rec: EntityRecord = bson::from_document(d).unwrap();
        assert_eq!(rec.votes, Some(4));
        assert_eq!(rec.times_rank, Some(12));
        assert_eq!(rec.city_id.as_deref(), Some("7"));
        assert_eq!(rec.experience_rating, Some(Aggregate { value: Some(4.0), count: Some(2) }));
        assert_eq!(rec.languages[0].name.as_deref(), Some("German"));
        assert_eq!(rec.reviews.unwrap()[0].votes, Some(2));
    }

    #[test]
    fn review_record_keeps_survey_answers() {
        let d = doc! {
            "_id": "s1", "university_id": "u2", "workload": 3, "languages": ["German", "English"],
            "area_of_study": "Law", "three_words_experience": ["sunny", "busy", { "odd": 1 }],
            "other_regions_visited": Bson::Null, "university_fees": 1200, "party_opportunities": true,
            "cost_of_beer": "3.5", "cost_of_rent": 450_i64, "side_jobs_rating": "n/a",
        };
        let rec: ReviewRecord = bson::from_document(d).unwrap();
        assert_eq!(rec.workload, Some(3.0));
        assert_eq!(rec.languages, vec!["German", "English"]);
        assert_eq!(rec.area_of_study, vec!["Law"]);
        assert_eq!(rec.three_words_experience, vec!["sunny", "busy"]);
        assert!(rec.other_regions_visited.is_empty());
        assert_eq!(rec.university_fees.as_deref(), Some("1200"));
        assert_eq!(rec.party_opportunities.as_deref(), Some("true"));
        assert_eq!(rec.cost_of_beer, Some(3.5));
        assert_eq!(rec.cost_of_rent, Some(450.0));
        assert_eq!(rec.side_jobs_rating, None);

        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["workload"], serde_json::json!(3.0));
        assert_eq!(v["languages"], serde_json::json!(["German", "English"]));
        assert!(v.get("cost_of_coffee").is_none());
    }

    #[test]
    fn summary_serializes_camel_case() {
        let v = serde_json::to_value(ReviewSummary { unis_count: 2, review_count: 8 }).unwrap();
        assert_eq!(v, serde_json::json!({ "unisCount": 2, "reviewCount": 8 }));
    }
}
