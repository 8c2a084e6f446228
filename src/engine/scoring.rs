use crate::adapters::MultiStopRoute;
use crate::config::PoolConfig;
use crate::geo::{bearing_degrees, direction_alignment};
use crate::models::driver::GeoPoint;
use crate::models::pool::{round_cents, PoolRide, RouteMatchScore};

const ROUTE_EFFICIENCY_WEIGHT: f64 = 0.40;
const TIME_EFFICIENCY_WEIGHT: f64 = 0.30;
const DIRECTION_WEIGHT: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub route_efficiency: f64,
    pub time_efficiency: f64,
    pub direction_alignment: f64,
}

/// Scores adding a rider going `pickup -> dropoff` to `pool`, given the route
/// the pool would drive with the rider's stops appended.
pub fn calculate_match_score(
    pool: &PoolRide,
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
    extended_route: &MultiStopRoute,
    config: &PoolConfig,
) -> RouteMatchScore {
    let detour_km = extended_route.total_distance_km - pool.total_distance_km;
    let detour_minutes = extended_route.total_duration_minutes - pool.total_duration_minutes;
    let detour_percent = if pool.total_distance_km > 0.0 {
        detour_km / pool.total_distance_km * 100.0
    } else {
        0.0
    };

    let rejected = RouteMatchScore {
        score: 0.0,
        detour_minutes,
        detour_km,
        detour_percent,
        cost_savings_percent: 0.0,
    };

    if detour_percent > config.max_detour_percent || detour_minutes > config.max_detour_minutes {
        return rejected;
    }

    let breakdown = ScoreBreakdown {
        route_efficiency: efficiency(detour_percent, config.max_detour_percent),
        time_efficiency: efficiency(detour_minutes, config.max_detour_minutes),
        direction_alignment: direction_alignment(
            bearing_degrees(&pool.center, dropoff),
            bearing_degrees(pickup, dropoff),
        ),
    };
    let score = weighted_score(&breakdown);

    RouteMatchScore {
        score,
        cost_savings_percent: config.discount_percent * score,
        ..rejected
    }
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    ((breakdown.route_efficiency * ROUTE_EFFICIENCY_WEIGHT)
        + (breakdown.time_efficiency * TIME_EFFICIENCY_WEIGHT)
        + (breakdown.direction_alignment * DIRECTION_WEIGHT))
        .clamp(0.0, 1.0)
}

fn efficiency(detour: f64, max_detour: f64) -> f64 {
    if max_detour <= 0.0 {
        return if detour <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - detour / max_detour).clamp(0.0, 1.0)
}

/// Fare for a rider joining an existing pool: their solo fare less the
/// score-weighted discount.
pub fn joined_pool_fare(original_fare: f64, match_score: &RouteMatchScore) -> f64 {
    round_cents(original_fare * (1.0 - match_score.cost_savings_percent / 100.0))
}

/// Fare for a rider opening a new pool: the flat discount.
pub fn new_pool_fare(original_fare: f64, config: &PoolConfig) -> f64 {
    round_cents(original_fare * (1.0 - config.discount_percent / 100.0))
}

pub fn savings_percent(original_fare: f64, pool_fare: f64) -> f64 {
    if original_fare <= 0.0 {
        return 0.0;
    }
    (1.0 - pool_fare / original_fare).max(0.0) * 100.0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{calculate_match_score, joined_pool_fare, new_pool_fare, savings_percent};
    use crate::adapters::MultiStopRoute;
    use crate::config::PoolConfig;
    use crate::models::driver::GeoPoint;
    use crate::models::pool::{PoolRide, PoolStatus};

    fn pool(center: GeoPoint, distance_km: f64, duration_minutes: f64) -> PoolRide {
        PoolRide {
            id: Uuid::new_v4(),
            driver_id: None,
            vehicle_id: None,
            status: PoolStatus::Matching,
            current_passengers: 1,
            max_passengers: 4,
            stops: Vec::new(),
            total_distance_km: distance_km,
            total_duration_minutes: duration_minutes,
            center,
            radius_km: 2.0,
            cell_id: "cell".to_string(),
            fares: PoolConfig::default().fares(),
            matching_deadline: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn route(distance_km: f64, duration_minutes: f64) -> MultiStopRoute {
        MultiStopRoute {
            total_distance_km: distance_km,
            total_duration_minutes: duration_minutes,
            legs: Vec::new(),
        }
    }

    #[test]
    fn aligned_small_detour_scores_high() {
        let config = PoolConfig::default();
        let existing = pool(GeoPoint::new(52.50, 13.40), 10.0, 20.0);

        let score = calculate_match_score(
            &existing,
            &GeoPoint::new(52.51, 13.40),
            &GeoPoint::new(52.60, 13.40),
            &route(11.0, 22.0),
            &config,
        );

        assert!((score.detour_km - 1.0).abs() < 1e-9);
        assert!((score.detour_percent - 10.0).abs() < 1e-9);
        assert!(score.score > 0.8 && score.score <= 1.0, "score was {}", score.score);
        assert!((score.cost_savings_percent - config.discount_percent * score.score).abs() < 1e-9);
    }

    #[test]
    fn detour_over_percent_limit_scores_zero() {
        let config = PoolConfig::default();
        let existing = pool(GeoPoint::new(52.50, 13.40), 10.0, 20.0);

        let score = calculate_match_score(
            &existing,
            &GeoPoint::new(52.51, 13.40),
            &GeoPoint::new(52.60, 13.40),
            &route(14.5, 25.0),
            &config,
        );

        assert_eq!(score.score, 0.0);
        assert_eq!(score.cost_savings_percent, 0.0);
    }

    #[test]
    fn detour_over_minutes_limit_scores_zero() {
        let config = PoolConfig::default();
        let existing = pool(GeoPoint::new(52.50, 13.40), 10.0, 20.0);

        let score = calculate_match_score(
            &existing,
            &GeoPoint::new(52.51, 13.40),
            &GeoPoint::new(52.60, 13.40),
            &route(11.0, 36.0),
            &config,
        );

        assert_eq!(score.score, 0.0);
    }

    #[test]
    fn opposite_direction_loses_alignment_points() {
        let config = PoolConfig::default();
        let existing = pool(GeoPoint::new(52.50, 13.40), 10.0, 20.0);
        let extended = route(11.0, 22.0);

        let same_way = calculate_match_score(
            &existing,
            &GeoPoint::new(52.51, 13.40),
            &GeoPoint::new(52.60, 13.40),
            &extended,
            &config,
        );
        let against = calculate_match_score(
            &existing,
            &GeoPoint::new(52.60, 13.40),
            &GeoPoint::new(52.55, 13.40),
            &extended,
            &config,
        );

        assert!(same_way.score > against.score);
        assert!((0.0..=1.0).contains(&against.score));
    }

    #[test]
    fn shorter_extended_route_never_exceeds_one() {
        let config = PoolConfig::default();
        let existing = pool(GeoPoint::new(52.50, 13.40), 10.0, 20.0);

        let score = calculate_match_score(
            &existing,
            &GeoPoint::new(52.51, 13.40),
            &GeoPoint::new(52.60, 13.40),
            &route(8.0, 15.0),
            &config,
        );

        assert!(score.score <= 1.0);
        assert!(score.score >= 0.0);
    }

    #[test]
    fn fares_and_savings() {
        let config = PoolConfig::default();
        assert_eq!(new_pool_fare(22.0, &config), 16.5);

        let match_score = crate::models::pool::RouteMatchScore {
            score: 0.8,
            cost_savings_percent: 20.0,
            ..Default::default()
        };
        assert_eq!(joined_pool_fare(22.0, &match_score), 17.6);

        assert!((savings_percent(22.0, 16.5) - 25.0).abs() < 1e-9);
        assert_eq!(savings_percent(22.0, 30.0), 0.0);
        assert_eq!(savings_percent(0.0, 0.0), 0.0);
    }
}
