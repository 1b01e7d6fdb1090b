use crate::analytics::AnalyticsDb;
use crate::config::Settings;
use crate::database::*;
use crate::error::Error;
use crate::model::*;
use crate::{page_context, redirect, reject, render, Db, Tera};
use actix_identity::Identity;
use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};

type SettingsData = web::Data<Settings>;

/// Looks up the movie named in the path; unknown ids answer 404.
fn movie_from_path(db: &sled::Db, path: web::Path<u64>) -> actix_web::Result<(MovieId, Movie)> {
    let movie_id = MovieId(path.into_inner());
    let movie = db.get_movie(movie_id).map_err(reject)?;
    Ok((movie_id, movie))
}

fn title_or_placeholder(db: &sled::Db, movie_id: MovieId) -> actix_web::Result<String> {
    match db.get_movie(movie_id) {
        Ok(movie) => Ok(movie.title),
        Err(Error::NotFound(_)) => Ok(format!("Movie #{}", movie_id)),
        Err(err) => Err(reject(err)),
    }
}

fn viewer_name(db: &sled::Db, viewer: Viewer) -> actix_web::Result<String> {
    let user = match viewer {
        Some(user_id) => db.get_user(user_id).map_err(reject)?,
        None => None,
    };
    Ok(user.map_or_else(|| "anonymous".to_owned(), |user| user.username))
}

#[derive(Serialize, Deserialize)]
pub struct NewMovie {
    title: String,
    duration: i64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
}

pub async fn new_movie(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (ctx, _viewer) = page_context(&req, &id, &db)?;
    render(&tera, "new_movie.html", &ctx)
}

pub async fn new_movie_post(params: web::Form<NewMovie>, db: Db) -> actix_web::Result<HttpResponse> {
    let movie_id = db
        .add_movie(
            params.title.trim(),
            params.duration,
            &params.description,
            params.url.trim(),
        )
        .map_err(reject)?;
    info!("movie {:?} added as {}", params.title, movie_id);
    Ok(redirect(&format!("/movies/{}?added", movie_id)))
}

#[derive(Serialize)]
struct ReviewRow {
    author: String,
    rating: u8,
    comment: String,
}

pub async fn watch(
    path: web::Path<u64>,
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let (movie_id, movie) = movie_from_path(&db, path)?;
    let reviews = db
        .reviews_for_movie(movie_id)
        .map_err(reject)?
        .into_iter()
        .map(|review| {
            Ok(ReviewRow {
                author: viewer_name(&db, review.viewer)?,
                rating: review.rating,
                comment: review.comment,
            })
        })
        .collect::<actix_web::Result<Vec<_>>>()?;
    let events = db.events_for_movie(movie_id).map_err(reject)?;
    ctx.insert("movie_id", &movie_id);
    ctx.insert("movie", &movie);
    ctx.insert("average", &db.average_rating(movie_id).map_err(reject)?);
    ctx.insert("reviews", &reviews);
    ctx.insert("event_count", &events.len());
    render(&tera, "watch.html", &ctx)
}

pub async fn simulate(
    path: web::Path<u64>,
    req: HttpRequest,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (_ctx, viewer) = page_context(&req, &id, &db)?;
    let (movie_id, _movie) = movie_from_path(&db, path)?;
    db.simulate_watch(viewer, movie_id).map_err(reject)?;
    Ok(redirect(&format!("/movies/{}?simulated", movie_id)))
}

pub async fn review(
    path: web::Path<u64>,
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let (movie_id, movie) = movie_from_path(&db, path)?;
    ctx.insert("movie_id", &movie_id);
    ctx.insert("movie", &movie);
    render(&tera, "review.html", &ctx)
}

#[derive(Serialize, Deserialize)]
pub struct NewReview {
    rating: i64,
    #[serde(default)]
    comment: String,
}

pub async fn review_post(
    path: web::Path<u64>,
    params: web::Form<NewReview>,
    req: HttpRequest,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (_ctx, viewer) = page_context(&req, &id, &db)?;
    let (movie_id, _movie) = movie_from_path(&db, path)?;
    db.record_review(viewer, movie_id, params.rating, params.comment.trim())
        .map_err(reject)?;
    Ok(redirect(&format!("/movies/{}?reviewed", movie_id)))
}

/// One report from the playback widget.
#[derive(Serialize, Deserialize)]
pub struct ProgressReport {
    time: f64,
    event: Option<String>,
}

#[derive(Serialize)]
struct ProgressRecorded {
    id: EventId,
}

pub async fn progress(
    path: web::Path<u64>,
    report: web::Json<ProgressReport>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (movie_id, _movie) = movie_from_path(&db, path)?;
    let timestamp = PlaybackTime::from_secs(report.time).map_err(reject)?;
    let event = report.event.as_deref().unwrap_or("play");
    let id = db
        .record_progress(movie_id, timestamp, event)
        .map_err(reject)?;
    Ok(HttpResponse::Ok().json(ProgressRecorded { id }))
}

#[derive(Serialize)]
struct SegmentRow {
    start: u64,
    end: u64,
    views: u64,
    percent: u64,
}

pub async fn heatmap(
    path: web::Path<u64>,
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
    settings: SettingsData,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let (movie_id, movie) = movie_from_path(&db, path)?;
    let heatmap = db
        .heatmap_for_movie(movie_id, settings.segment_width)
        .map_err(reject)?;
    let max_views = heatmap.peak.map_or(1, |peak| peak.views);
    let segments = heatmap
        .segments
        .iter()
        .map(|segment| SegmentRow {
            start: segment.start,
            end: segment.end,
            views: segment.views,
            percent: segment.views * 100 / max_views,
        })
        .collect::<Vec<_>>();
    ctx.insert("movie_id", &movie_id);
    ctx.insert("movie", &movie);
    ctx.insert("heatmap", &heatmap);
    ctx.insert("segments", &segments);
    render(&tera, "heatmap.html", &ctx)
}

pub async fn heatmap_json(
    path: web::Path<u64>,
    db: Db,
    settings: SettingsData,
) -> actix_web::Result<HttpResponse> {
    let (movie_id, _movie) = movie_from_path(&db, path)?;
    let heatmap = db
        .heatmap_for_movie(movie_id, settings.segment_width)
        .map_err(reject)?;
    Ok(HttpResponse::Ok().json(heatmap))
}

#[derive(Serialize)]
struct HistogramRow {
    timestamp: String,
    action: Action,
    count: u64,
    percent: u64,
}

#[derive(Serialize)]
struct RatingRow {
    movie_id: MovieId,
    title: String,
    average: f64,
    reviews: u64,
}

pub async fn analytics(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let histogram = db.engagement_summary().map_err(reject)?;
    let max_count = histogram.iter().map(|row| row.count).max().unwrap_or(1);
    let histogram = histogram
        .into_iter()
        .map(|row| HistogramRow {
            timestamp: row.timestamp.to_string(),
            action: row.action,
            count: row.count,
            percent: row.count * 100 / max_count,
        })
        .collect::<Vec<_>>();
    let ratings = db
        .rating_summary()
        .map_err(reject)?
        .into_iter()
        .map(|rating| {
            Ok(RatingRow {
                movie_id: rating.movie_id,
                title: title_or_placeholder(&db, rating.movie_id)?,
                average: rating.average,
                reviews: rating.reviews,
            })
        })
        .collect::<actix_web::Result<Vec<_>>>()?;
    ctx.insert("histogram", &histogram);
    ctx.insert("ratings", &ratings);
    render(&tera, "analytics.html", &ctx)
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct SearchHit {
    id: MovieId,
    title: String,
    score: f32,
}

pub async fn search(
    params: web::Query<SearchParams>,
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let hits = db
        .search_movies(&params.q)
        .map_err(reject)?
        .into_iter()
        .map(|(movie_id, score)| {
            Ok(SearchHit {
                id: movie_id,
                title: title_or_placeholder(&db, movie_id)?,
                score,
            })
        })
        .collect::<actix_web::Result<Vec<_>>>()?;
    let exact = db
        .find_movie_by_title(params.q.trim())
        .map_err(reject)?
        .map(|(movie_id, _movie)| movie_id);
    ctx.insert("query", &params.q);
    ctx.insert("exact", &exact);
    ctx.insert("hits", &hits);
    render(&tera, "search.html", &ctx)
}
