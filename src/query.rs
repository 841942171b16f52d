use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::metadata::{fields, GeoPoint};

/// Comparison operators available to the numeric filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOperator {
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl NumericOperator {
    /// The query clause for `field <op> value`.
    fn clause(self, field: &str, value: f64) -> Value {
        match self {
            NumericOperator::Equal => json!({ "term": { field: value } }),
            NumericOperator::GreaterThan => json!({ "range": { field: { "gt": value } } }),
            NumericOperator::GreaterThanOrEqual => json!({ "range": { field: { "gte": value } } }),
            NumericOperator::LessThan => json!({ "range": { field: { "lt": value } } }),
            NumericOperator::LessThanOrEqual => json!({ "range": { field: { "lte": value } } }),
        }
    }
}

/// Units a numeric distance filter may be entered in. Everything is
/// converted to meters before it reaches the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnits {
    Meters,
    Feet,
}

impl DistanceUnits {
    pub fn to_meters(self, value: f64) -> f64 {
        match self {
            DistanceUnits::Meters => value,
            DistanceUnits::Feet => value * 0.3048,
        }
    }
}

/// Parses user-entered numeric filter text. Validation is advisory at the
/// UI level, so unparseable input falls back to a neutral 0 here.
pub fn parse_numeric_input(text: &str) -> f64 {
    text.trim().parse().unwrap_or(0.0)
}

/// An accumulator of filter clauses combined with logical AND. Clause order
/// never affects the result set.
#[derive(Debug, Clone, Default)]
pub struct StructuredQuery {
    must: Vec<Value>,
}

impl StructuredQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn clause_count(&self) -> usize {
        self.must.len()
    }

    pub fn add_numeric(&mut self, field: &str, operator: NumericOperator, value: f64) {
        self.must.push(operator.clause(field, value));
    }

    /// Adds one terms clause matching any of the given members. An empty set
    /// adds nothing rather than a clause that matches nothing.
    pub fn add_terms<T: Serialize>(&mut self, field: &str, members: &[T]) {
        if members.is_empty() {
            return;
        }
        self.must.push(json!({ "terms": { field: members } }));
    }

    pub fn add_date_range(
        &mut self,
        field: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) {
        if start.is_none() && end.is_none() {
            return;
        }
        let start = start.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = end.unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.must.push(json!({
            "range": {
                field: {
                    "gte": start.to_rfc3339(),
                    "lte": end.to_rfc3339(),
                }
            }
        }));
    }

    pub fn add_year_range(&mut self, field: &str, start: Option<i32>, end: Option<i32>) {
        if start.is_none() && end.is_none() {
            return;
        }
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(9999);
        self.must
            .push(json!({ "range": { field: { "gte": start, "lte": end } } }));
    }

    pub fn add_geo_bounding_box(&mut self, field: &str, top_left: GeoPoint, bottom_right: GeoPoint) {
        self.must.push(json!({
            "geo_bounding_box": {
                field: {
                    "top_left": top_left,
                    "bottom_right": bottom_right,
                }
            }
        }));
    }

    pub fn add_geo_polygon(&mut self, field: &str, points: &[GeoPoint]) {
        self.must.push(json!({
            "geo_polygon": {
                "validation_method": "IGNORE_MALFORMED",
                field: { "points": points },
            }
        }));
    }

    /// The finished query body. With no clauses this is match_all, so an
    /// all-default condition list scans the whole index.
    pub fn to_body(&self) -> Value {
        if self.must.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({ "bool": { "must": self.must } })
        }
    }
}

/// One filter in a query, a closed set of variants. Each variant contributes
/// zero or more clauses to a [`StructuredQuery`]; an unset condition
/// contributes nothing. Conditions are independent, so appending them in any
/// order yields the same result set.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCondition {
    AltitudeCompare {
        value: f64,
        units: DistanceUnits,
        operator: NumericOperator,
    },
    ElevationCompare {
        value: f64,
        units: DistanceUnits,
        operator: NumericOperator,
    },
    DateRange {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    YearRange {
        start: Option<i32>,
        end: Option<i32>,
    },
    HourSet(BTreeSet<u32>),
    DayOfWeekSet(BTreeSet<u32>),
    FileTypeSet(BTreeSet<String>),
    CollectionSet(BTreeSet<String>),
    SiteSet(BTreeSet<String>),
    /// The four corners of a user-drawn rectangle, in any order.
    BoundingBox { corners: Vec<GeoPoint> },
    Polygon { points: Vec<GeoPoint> },
    Viewport {
        top_left: GeoPoint,
        bottom_right: GeoPoint,
    },
}

impl QueryCondition {
    /// Builds an altitude filter from raw UI text, coercing bad input to 0.
    pub fn altitude_from_input(text: &str, units: DistanceUnits, operator: NumericOperator) -> Self {
        QueryCondition::AltitudeCompare {
            value: parse_numeric_input(text),
            units,
            operator,
        }
    }

    /// Builds an elevation filter from raw UI text, coercing bad input to 0.
    pub fn elevation_from_input(text: &str, units: DistanceUnits, operator: NumericOperator) -> Self {
        QueryCondition::ElevationCompare {
            value: parse_numeric_input(text),
            units,
            operator,
        }
    }

    pub fn append_to(&self, query: &mut StructuredQuery) {
        match self {
            QueryCondition::AltitudeCompare {
                value,
                units,
                operator,
            } => {
                query.add_numeric(fields::ALTITUDE, *operator, units.to_meters(*value));
            }
            QueryCondition::ElevationCompare {
                value,
                units,
                operator,
            } => {
                query.add_numeric(fields::ELEVATION, *operator, units.to_meters(*value));
            }
            QueryCondition::DateRange { start, end } => {
                query.add_date_range(fields::DATE_TAKEN, *start, *end);
            }
            QueryCondition::YearRange { start, end } => {
                query.add_year_range(fields::YEAR_TAKEN, *start, *end);
            }
            QueryCondition::HourSet(hours) => {
                let hours: Vec<u32> = hours.iter().copied().collect();
                query.add_terms(fields::HOUR_TAKEN, &hours);
            }
            QueryCondition::DayOfWeekSet(days) => {
                let days: Vec<u32> = days.iter().copied().collect();
                query.add_terms(fields::DAY_OF_WEEK_TAKEN, &days);
            }
            QueryCondition::FileTypeSet(types) => {
                let types: Vec<&String> = types.iter().collect();
                query.add_terms(fields::FILE_TYPE, &types);
            }
            QueryCondition::CollectionSet(ids) => {
                let ids: Vec<&String> = ids.iter().collect();
                query.add_terms(fields::COLLECTION_ID, &ids);
            }
            QueryCondition::SiteSet(codes) => {
                let codes: Vec<&String> = codes.iter().collect();
                query.add_terms(fields::SITE_CODE, &codes);
            }
            QueryCondition::BoundingBox { corners } => {
                // A drawn box is described by its 4 extreme corners; anything
                // else is a degenerate drag and adds nothing.
                if corners.len() != 4 {
                    return;
                }
                let min_lat = corners.iter().map(|c| c.lat).fold(f64::INFINITY, f64::min);
                let max_lat = corners.iter().map(|c| c.lat).fold(f64::NEG_INFINITY, f64::max);
                let min_lon = corners.iter().map(|c| c.lon).fold(f64::INFINITY, f64::min);
                let max_lon = corners.iter().map(|c| c.lon).fold(f64::NEG_INFINITY, f64::max);
                query.add_geo_bounding_box(
                    fields::POSITION,
                    GeoPoint::new(max_lat, min_lon),
                    GeoPoint::new(min_lat, max_lon),
                );
            }
            QueryCondition::Polygon { points } => {
                if points.len() < 3 {
                    return;
                }
                query.add_geo_polygon(fields::POSITION, points);
            }
            QueryCondition::Viewport {
                top_left,
                bottom_right,
            } => {
                query.add_geo_bounding_box(fields::POSITION, *top_left, *bottom_right);
            }
        }
    }
}

/// Appends every condition in list order and returns the finished query.
pub fn compose(conditions: &[QueryCondition]) -> StructuredQuery {
    let mut query = StructuredQuery::new();
    for condition in conditions {
        condition.append_to(&mut query);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_conditions_contribute_nothing() {
        let empty: Vec<QueryCondition> = vec![
            QueryCondition::HourSet(BTreeSet::new()),
            QueryCondition::SiteSet(BTreeSet::new()),
            QueryCondition::CollectionSet(BTreeSet::new()),
            QueryCondition::FileTypeSet(BTreeSet::new()),
            QueryCondition::DayOfWeekSet(BTreeSet::new()),
            QueryCondition::DateRange {
                start: None,
                end: None,
            },
            QueryCondition::YearRange {
                start: None,
                end: None,
            },
            QueryCondition::Polygon { points: Vec::new() },
            QueryCondition::BoundingBox {
                corners: Vec::new(),
            },
        ];
        let query = compose(&empty);
        assert!(query.is_empty());
        assert_eq!(query.to_body(), serde_json::json!({ "match_all": {} }));
    }

    #[test]
    fn appending_empty_condition_leaves_query_unchanged() {
        let mut query = StructuredQuery::new();
        QueryCondition::SiteSet(["SRER".to_string()].into_iter().collect()).append_to(&mut query);
        let before = query.to_body();
        QueryCondition::HourSet(BTreeSet::new()).append_to(&mut query);
        assert_eq!(query.to_body(), before);
    }

    #[test]
    fn altitude_condition_converts_feet_to_meters() {
        let condition = QueryCondition::AltitudeCompare {
            value: 100.0,
            units: DistanceUnits::Feet,
            operator: NumericOperator::GreaterThanOrEqual,
        };
        let mut query = StructuredQuery::new();
        condition.append_to(&mut query);
        let body = query.to_body();
        let gte = &body["bool"]["must"][0]["range"]["imageMetadata.altitude"]["gte"];
        assert!((gte.as_f64().unwrap() - 30.48).abs() < 1e-9);
    }

    #[test]
    fn invalid_numeric_input_coerces_to_zero() {
        let condition = QueryCondition::altitude_from_input(
            "not a number",
            DistanceUnits::Meters,
            NumericOperator::Equal,
        );
        match condition {
            QueryCondition::AltitudeCompare { value, .. } => assert_eq!(value, 0.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn bounding_box_uses_corner_extremes() {
        let condition = QueryCondition::BoundingBox {
            corners: vec![
                GeoPoint::new(31.0, -111.0),
                GeoPoint::new(33.0, -111.5),
                GeoPoint::new(31.5, -110.0),
                GeoPoint::new(32.0, -110.5),
            ],
        };
        let mut query = StructuredQuery::new();
        condition.append_to(&mut query);
        let body = query.to_body();
        let boxed = &body["bool"]["must"][0]["geo_bounding_box"]["imageMetadata.position"];
        assert_eq!(boxed["top_left"]["lat"], 33.0);
        assert_eq!(boxed["top_left"]["lon"], -111.5);
        assert_eq!(boxed["bottom_right"]["lat"], 31.0);
        assert_eq!(boxed["bottom_right"]["lon"], -110.0);
    }

    #[test]
    fn bounding_box_requires_exactly_four_corners() {
        for count in [0usize, 1, 2, 3, 5] {
            let corners = vec![GeoPoint::new(1.0, 1.0); count];
            let mut query = StructuredQuery::new();
            QueryCondition::BoundingBox { corners }.append_to(&mut query);
            assert!(query.is_empty(), "{} corners should add no clause", count);
        }
    }

    #[test]
    fn polygon_needs_three_points() {
        let mut query = StructuredQuery::new();
        QueryCondition::Polygon {
            points: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)],
        }
        .append_to(&mut query);
        assert!(query.is_empty());

        QueryCondition::Polygon {
            points: vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(0.0, 1.0),
            ],
        }
        .append_to(&mut query);
        assert_eq!(query.clause_count(), 1);
    }

    #[test]
    fn date_range_clamps_missing_bounds() {
        let mut query = StructuredQuery::new();
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        QueryCondition::DateRange {
            start: Some(start),
            end: None,
        }
        .append_to(&mut query);
        let body = query.to_body();
        let range = &body["bool"]["must"][0]["range"]["imageMetadata.dateTaken"];
        assert_eq!(range["gte"], start.to_rfc3339());
        assert_eq!(range["lte"], DateTime::<Utc>::MAX_UTC.to_rfc3339());
    }

    #[test]
    fn clause_order_does_not_matter() {
        let a = QueryCondition::SiteSet(["SRER".to_string()].into_iter().collect());
        let b = QueryCondition::YearRange {
            start: Some(2018),
            end: Some(2020),
        };
        let forward = compose(&[a.clone(), b.clone()]);
        let backward = compose(&[b, a]);
        let clauses = |q: &StructuredQuery| {
            let body = q.to_body();
            let mut list: Vec<String> = body["bool"]["must"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.to_string())
                .collect();
            list.sort();
            list
        };
        assert_eq!(clauses(&forward), clauses(&backward));
    }
}
