use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::db::models::{FeatureExperiment, MarketOdds, ModelVote, UserPrediction};
use crate::engine::ensemble::VoteSource;
use crate::engine::experiment::{self, ExperimentResults, ExperimentStatus};
use crate::engine::freshness::{self, FreshnessStatus};
use crate::engine::outcome::Outcome;
use crate::engine::{EngineError, Recomputer};

#[derive(Clone)]
pub struct AppState {
    pub recomputer: Recomputer,
    /// Default cut-off for `/api/value-bets` when the caller gives none
    pub min_expected_value: f64,
    pub significance_alpha: f64,
}

type ApiError = (StatusCode, String);

/// Engine rejections are the caller's fault; everything else is ours.
fn api_error(e: anyhow::Error) -> ApiError {
    match e.downcast_ref::<EngineError>() {
        Some(engine_err) => engine_status(engine_err, e.to_string()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Illegal lifecycle moves conflict with stored state; other engine errors are bad input.
fn engine_status(e: &EngineError, msg: String) -> ApiError {
    match e {
        EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, msg),
        _ => (StatusCode::BAD_REQUEST, msg),
    }
}

fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{} not found", what))
}

fn parse_outcome(raw: &str) -> Result<Outcome, ApiError> {
    raw.parse::<Outcome>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// Build the Axum router for the admin API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/predictions", get(predictions_handler))
        .route("/api/matches/:id/prediction", get(prediction_handler))
        .route("/api/matches/:id/votes", post(submit_vote_handler))
        .route("/api/matches/:id/result", post(resolve_handler))
        .route("/api/matches/:id/crowd", get(crowd_handler))
        .route("/api/matches/:id/user-predictions", post(user_prediction_handler))
        .route("/api/market-odds", post(market_odds_handler))
        .route("/api/value-bets", get(value_bets_handler))
        .route("/api/freshness/stale", get(stale_handler))
        .route("/api/freshness/:table/:record_id", get(freshness_handler))
        .route(
            "/api/experiments",
            get(experiments_handler).post(create_experiment_handler),
        )
        .route("/api/experiments/:id/complete", post(complete_experiment_handler))
        .route("/api/experiments/:id/approve", post(approve_experiment_handler))
        .route("/api/experiments/:id/reject", post(reject_experiment_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

/// GET /api/health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Predictions ──────────────────────────────────────────────────────────────

/// GET /api/predictions?limit=50
async fn predictions_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .recomputer
        .db()
        .list_predictions(q.limit.unwrap_or(50).clamp(1, 500))
        .map(Json)
        .map_err(api_error)
}

/// GET /api/matches/:id/prediction
async fn prediction_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .recomputer
        .db()
        .get_prediction(&match_id)
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found("prediction"))
}

#[derive(Debug, Deserialize)]
struct VoteBody {
    source: String,
    prediction: String,
    confidence: f64,
}

/// POST /api/matches/:id/votes: store one model's vote and re-aggregate
async fn submit_vote_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    Json(body): Json<VoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let source = body
        .source
        .parse::<VoteSource>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let predicted_outcome = parse_outcome(&body.prediction)?;
    crate::engine::error::check_confidence(body.confidence)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let now = Utc::now();
    let r = &state.recomputer;
    let evaluated = r
        .db()
        .get_prediction(&match_id)
        .map_err(api_error)?
        .is_some_and(|p| p.evaluated_at.is_some());
    if evaluated {
        return Err((
            StatusCode::CONFLICT,
            format!("match {} is already resolved; votes are closed", match_id),
        ));
    }
    r.db()
        .upsert_model_vote(&ModelVote {
            match_id: match_id.clone(),
            source,
            predicted_outcome,
            confidence: body.confidence,
            created_at: now,
        })
        .map_err(api_error)?;
    let prediction = r
        .recompute_prediction(&match_id, now)
        .map_err(api_error)?
        .prediction();
    Ok(Json(prediction))
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    actual_outcome: String,
}

/// POST /api/matches/:id/result
async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actual = parse_outcome(&body.actual_outcome)?;
    state
        .recomputer
        .resolve_match(&match_id, actual, Utc::now())
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found("prediction"))
}

// ── Crowd wisdom ─────────────────────────────────────────────────────────────

/// GET /api/matches/:id/crowd
async fn crowd_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .recomputer
        .db()
        .get_crowd_wisdom(&match_id)
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found("crowd aggregate"))
}

#[derive(Debug, Deserialize)]
struct UserPredictionBody {
    user_id: String,
    predicted_outcome: String,
    confidence_score: f64,
    reasoning: Option<String>,
}

/// POST /api/matches/:id/user-predictions
async fn user_prediction_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    Json(body): Json<UserPredictionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let up = UserPrediction {
        id: None,
        match_id,
        user_id: body.user_id,
        predicted_outcome: parse_outcome(&body.predicted_outcome)?,
        confidence_score: body.confidence_score,
        reasoning: body.reasoning,
        created_at: Utc::now(),
    };
    state
        .recomputer
        .submit_user_prediction(&up)
        .map(|cw| (StatusCode::CREATED, Json(cw)))
        .map_err(api_error)
}

// ── Market odds & value bets ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MarketOddsBody {
    match_id: String,
    bookmaker: String,
    api_source: String,
    home_win_odds: f64,
    draw_odds: f64,
    away_win_odds: f64,
}

/// POST /api/market-odds
async fn market_odds_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MarketOddsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let odds = MarketOdds {
        id: None,
        match_id: body.match_id,
        bookmaker: body.bookmaker,
        api_source: body.api_source,
        home_win_odds: body.home_win_odds,
        draw_odds: body.draw_odds,
        away_win_odds: body.away_win_odds,
        last_updated: Utc::now(),
    };
    state
        .recomputer
        .record_market_odds(&odds)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
struct ValueBetQuery {
    min_ev: Option<f64>,
    limit: Option<usize>,
}

/// GET /api/value-bets?min_ev=0.05&limit=10
async fn value_bets_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ValueBetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let min_ev = q.min_ev.unwrap_or(state.min_expected_value);
    state
        .recomputer
        .surfaced_value_bets(min_ev, q.limit.unwrap_or(10).clamp(1, 500))
        .map(Json)
        .map_err(api_error)
}

// ── Freshness ────────────────────────────────────────────────────────────────

/// GET /api/freshness/stale?limit=10
async fn stale_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .recomputer
        .db()
        .list_stale_freshness(q.limit.unwrap_or(10).clamp(1, 500))
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Serialize)]
struct FreshnessView {
    #[serde(flatten)]
    row: crate::db::models::InformationFreshness,
    status: FreshnessStatus,
}

/// GET /api/freshness/:table/:record_id
async fn freshness_handler(
    State(state): State<Arc<AppState>>,
    Path((table, record_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .recomputer
        .db()
        .get_freshness(&table, &record_id)
        .map_err(api_error)?
        .ok_or_else(|| not_found("freshness record"))?;
    let status = freshness::status(row.freshness_score, row.is_stale);
    Ok(Json(FreshnessView { row, status }))
}

// ── Feature experiments ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ExperimentView {
    #[serde(flatten)]
    experiment: FeatureExperiment,
    status: ExperimentStatus,
}

impl From<FeatureExperiment> for ExperimentView {
    fn from(experiment: FeatureExperiment) -> Self {
        let status = experiment::status(&experiment);
        ExperimentView { experiment, status }
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentQuery {
    #[serde(default)]
    active_only: bool,
}

/// GET /api/experiments?active_only=true
async fn experiments_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ExperimentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .recomputer
        .db()
        .list_experiments(q.active_only)
        .map_err(api_error)?;
    Ok(Json(rows.into_iter().map(ExperimentView::from).collect::<Vec<_>>()))
}

#[derive(Debug, Deserialize)]
struct NewExperimentBody {
    experiment_name: String,
    feature_type: String,
    feature_expression: String,
    #[serde(default)]
    base_features: Option<serde_json::Value>,
    #[serde(default)]
    generated_feature: Option<serde_json::Value>,
}

/// POST /api/experiments
async fn create_experiment_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewExperimentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let mut exp = FeatureExperiment {
        id: None,
        experiment_name: body.experiment_name,
        feature_type: body.feature_type,
        feature_expression: body.feature_expression,
        base_features: body.base_features.unwrap_or_else(|| serde_json::json!({})),
        generated_feature: body.generated_feature.unwrap_or_else(|| serde_json::json!({})),
        test_start_date: now,
        test_end_date: None,
        sample_size: 0,
        control_accuracy: None,
        test_accuracy: None,
        improvement_delta: None,
        p_value: None,
        statistical_significance: false,
        is_active: true,
        is_approved: false,
        created_at: now,
        updated_at: now,
    };
    let id = state
        .recomputer
        .db()
        .insert_experiment(&exp)
        .map_err(api_error)?;
    exp.id = Some(id);
    Ok((StatusCode::CREATED, Json(ExperimentView::from(exp))))
}

/// Load, transition and persist an experiment.
fn transition_experiment<F>(
    state: &AppState,
    id: i64,
    apply: F,
) -> Result<Json<ExperimentView>, ApiError>
where
    F: FnOnce(&mut FeatureExperiment) -> Result<(), EngineError>,
{
    let db = state.recomputer.db();
    let mut exp = db
        .get_experiment(id)
        .map_err(api_error)?
        .ok_or_else(|| not_found("experiment"))?;
    apply(&mut exp).map_err(|e| engine_status(&e, e.to_string()))?;
    db.update_experiment(&exp).map_err(api_error)?;
    tracing::info!(
        "Experiment {} '{}' is now {}",
        id,
        exp.experiment_name,
        experiment::status(&exp)
    );
    Ok(Json(ExperimentView::from(exp)))
}

/// POST /api/experiments/:id/complete
async fn complete_experiment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(results): Json<ExperimentResults>,
) -> Result<impl IntoResponse, ApiError> {
    let alpha = state.significance_alpha;
    transition_experiment(&state, id, |exp| {
        experiment::complete(exp, results, alpha, Utc::now())
    })
}

/// POST /api/experiments/:id/approve
async fn approve_experiment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    transition_experiment(&state, id, |exp| experiment::approve(exp, Utc::now()))
}

/// POST /api/experiments/:id/reject
async fn reject_experiment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    transition_experiment(&state, id, |exp| experiment::reject(exp, Utc::now()))
}
