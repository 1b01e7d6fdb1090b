#[cfg(test)]
macro_rules! test_app {
    ($db:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(actix_identity::IdentityService::new(
                    actix_identity::CookieIdentityPolicy::new(&[0; 32])
                        .name("auth-cookie")
                        .secure(false),
                ))
                .data(
                    tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
                        .unwrap(),
                )
                .data($db.clone())
                .data(crate::config::Settings {
                    segment_width: crate::analytics::SegmentWidth::default(),
                })
                .configure(crate::routes),
        )
        .await
    };
}

mod analytics;
mod config;
mod database;
mod error;
mod fts_tree;
mod model;
mod pages;

use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::error::{ErrorBadRequest, ErrorInternalServerError, ErrorNotFound};
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use clap::Parser;
use config::Config;
use database::*;
use log::{debug, info};
use model::*;
use serde::{Deserialize, Serialize};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> actix_web::Error {
    debug!("{:?}", err);
    ErrorInternalServerError(message)
}

/// Turns a store error into the response the user sees.
fn reject(err: error::Error) -> actix_web::Error {
    match err {
        error::Error::NotFound(_) => ErrorNotFound(err.to_string()),
        error::Error::DuplicateUsername | error::Error::InvalidCredentials => {
            ErrorBadRequest(err.to_string())
        }
        err if err.is_invalid_input() => ErrorBadRequest(err.to_string()),
        err => log_error(err, "Database error"),
    }
}

fn render(tera: &tera::Tera, template: &str, ctx: &tera::Context) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

/// Template context with the logged in user and the query string as `notice`.
fn page_context(
    req: &HttpRequest,
    id: &Identity,
    db: &sled::Db,
) -> actix_web::Result<(tera::Context, Viewer)> {
    let mut ctx = tera::Context::new();
    ctx.insert("notice", req.query_string());
    let viewer = match id.identity() {
        Some(username) => match db.get_user_by_username(&username).map_err(reject)? {
            Some((user_id, user)) => {
                ctx.insert("user", &user.username);
                Some(user_id)
            }
            None => {
                debug!("forgetting unknown user {}", username);
                id.forget();
                None
            }
        },
        None => None,
    };
    Ok((ctx, viewer))
}

#[derive(Serialize)]
struct MovieRow {
    id: MovieId,
    title: String,
    duration: u32,
}

async fn index(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (mut ctx, _viewer) = page_context(&req, &id, &db)?;
    let movies = db
        .list_movies()
        .map_err(reject)?
        .into_iter()
        .map(|(id, movie)| MovieRow {
            id,
            title: movie.title,
            duration: movie.duration,
        })
        .collect::<Vec<_>>();
    ctx.insert("movies", &movies);
    render(&tera, "index.html", &ctx)
}

#[derive(Serialize, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn signup(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (ctx, _viewer) = page_context(&req, &id, &db)?;
    render(&tera, "signup.html", &ctx)
}

async fn signup_post(params: web::Form<Credentials>, db: Db) -> actix_web::Result<HttpResponse> {
    let username = params.username.trim();
    if username.is_empty() || params.password.is_empty() {
        return Ok(redirect("/signup?invalid"));
    }
    match db.register_user(username, &params.password) {
        Ok(user_id) => {
            info!("new account {} ({})", username, user_id);
            Ok(redirect("/login?registered"))
        }
        Err(error::Error::DuplicateUsername) => Ok(redirect("/signup?taken")),
        Err(err) => Err(reject(err)),
    }
}

async fn login(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (ctx, _viewer) = page_context(&req, &id, &db)?;
    render(&tera, "login.html", &ctx)
}

async fn login_post(
    params: web::Form<Credentials>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    match db.authenticate(params.username.trim(), &params.password) {
        Ok((_user_id, user)) => {
            id.remember(user.username);
            Ok(redirect("/"))
        }
        Err(error::Error::InvalidCredentials) => Ok(redirect("/login?wrong_password")),
        Err(err) => Err(reject(err)),
    }
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    id.forget();
    Ok(redirect("/login?logout"))
}

async fn help(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let (ctx, _viewer) = page_context(&req, &id, &db)?;
    render(&tera, "help.html", &ctx)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/signup", web::get().to(signup))
        .route("/signup", web::post().to(signup_post))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/logout", web::get().to(logout))
        .route("/help", web::get().to(help))
        .route("/search", web::get().to(pages::search))
        .route("/analytics", web::get().to(pages::analytics))
        .route("/movies/new", web::get().to(pages::new_movie))
        .route("/movies/new", web::post().to(pages::new_movie_post))
        .route("/movies/{id}", web::get().to(pages::watch))
        .route("/movies/{id}/simulate", web::post().to(pages::simulate))
        .route("/movies/{id}/review", web::get().to(pages::review))
        .route("/movies/{id}/review", web::post().to(pages::review_post))
        .route("/movies/{id}/progress", web::post().to(pages::progress))
        .route("/movies/{id}/heatmap", web::get().to(pages::heatmap))
        .route("/api/movies/{id}/heatmap", web::get().to(pages::heatmap_json));
}

fn seed_demo(db: &sled::Db) -> error::Result<()> {
    if db.list_movies()?.is_empty() {
        let id = db.add_movie(
            "Big Buck Bunny",
            10,
            "A giant rabbit takes revenge on three bullying rodents.",
            "https://download.blender.org/peach/bigbuckbunny_movies/BigBuckBunny_320x180.mp4",
        )?;
        info!("seeded demo movie {}", id);
    }
    Ok(())
}

fn startup_error<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("reelpulse=debug,actix_web=info"),
    )
    .init();

    let config = Config::parse();
    let settings = config.settings().map_err(startup_error)?;
    let cookie_key = config.cookie_key().map_err(startup_error)?;
    let tera = tera::Tera::new(&config.templates_glob()).map_err(startup_error)?;
    let db = config.open_database().map_err(startup_error)?;
    if config.seed_demo {
        seed_demo(&db).map_err(startup_error)?;
    }
    match &config.database {
        Some(path) => info!("database at {}", path.display()),
        None => info!("using a temporary database"),
    }
    info!(
        "listening on {}, heatmap segments of {}s",
        config.bind,
        settings.segment_width.secs()
    );

    let server_db = db.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&cookie_key)
                    .name("auth-cookie")
                    .secure(false),
            ))
            .data(tera.clone())
            .data(server_db.clone())
            .data(settings.clone())
            .configure(routes)
    })
    .bind(&config.bind)?
    .run()
    .await?;

    db.flush().map_err(startup_error)?;
    info!("database flushed, shutting down");
    Ok(())
}
