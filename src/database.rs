use crate::error::{corrupt, Error, Result};
use crate::fts_tree::{FTSExt, FTSTree};
use crate::model::*;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use std::convert::TryFrom;

// Big-endian so that key order is id order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64> {
    let bytes = <[u8; 8]>::try_from(id.as_ref()).map_err(|_| corrupt("id key is not 8 bytes"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Key of a per-movie record: scanning the movie prefix yields records in the order recorded.
fn movie_key(movie_id: MovieId, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&serialize_id(movie_id.0));
    key[8..].copy_from_slice(&serialize_id(id));
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

fn decode_all<T: DeserializeOwned>(iter: sled::Iter) -> Result<Vec<T>> {
    iter.values().map(|value| decode(&value?)).collect()
}

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"USERS_USERNAME";
const MOVIES: &[u8] = b"movies";
const MOVIES_SEARCH: &[u8] = b"movies_search";
const VIEWS: &[u8] = b"views";
const REVIEWS: &[u8] = b"reviews";
const SMART_WATCH: &[u8] = b"smart_watch";

pub trait UserDb {
    /// Returns `None` if the username is taken.
    fn add_user(&self, user: &User) -> Result<Option<UserId>>;
    fn get_user(&self, id: UserId) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<(UserId, User)>>;

    fn register_user(&self, username: &str, password: &str) -> Result<UserId> {
        let user = User {
            username: username.to_owned(),
            password_hash: bcrypt::hash(password, HASH_COST)?,
        };
        self.add_user(&user)?.ok_or(Error::DuplicateUsername)
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<(UserId, User)> {
        match self.get_user_by_username(username)? {
            Some((id, user)) if bcrypt::verify(password, &user.password_hash)? => Ok((id, user)),
            _ => Err(Error::InvalidCredentials),
        }
    }
}

impl UserDb for sled::Db {
    fn add_user(&self, user: &User) -> Result<Option<UserId>> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let id = self.generate_id()?;
        let key = serialize_id(id);
        let value = encode(user)?;
        let result = (&users, &users_username).transaction(
            |(users, users_username)| -> ConflictableTransactionResult<(), ()> {
                users.insert(&key[..], value.as_slice())?;
                if users_username
                    .insert(user.username.as_bytes(), &key[..])?
                    .is_some()
                {
                    return sled::transaction::abort(());
                }
                Ok(())
            },
        );
        match result {
            Ok(()) => {
                debug!("added user {} ({})", user.username, id);
                Ok(Some(UserId(id)))
            }
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        users
            .get(serialize_id(id.0))?
            .map(|data| decode(&data))
            .transpose()
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<(UserId, User)>> {
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = users_username.get(username)? {
            let data = users
                .get(&id)?
                .ok_or_else(|| corrupt("bad index users_username"))?;
            Ok(Some((UserId(deserialize_id(id)?), decode(&data)?)))
        } else {
            Ok(None)
        }
    }
}

/// The movie catalog.
pub trait MovieDb {
    fn add_movie(&self, title: &str, duration: i64, description: &str, url: &str)
        -> Result<MovieId>;
    fn get_movie(&self, id: MovieId) -> Result<Movie>;
    fn list_movies(&self) -> Result<Vec<(MovieId, Movie)>>;
    fn find_movie_by_title(&self, title: &str) -> Result<Option<(MovieId, Movie)>>;
    /// Ranked full-text search over titles and descriptions, best match first.
    fn search_movies(&self, query: &str) -> Result<Vec<(MovieId, f32)>>;
}

fn search_index(db: &sled::Db) -> Result<FTSTree> {
    Ok(db.open_fts(MOVIES_SEARCH)?)
}

impl MovieDb for sled::Db {
    fn add_movie(
        &self,
        title: &str,
        duration: i64,
        description: &str,
        url: &str,
    ) -> Result<MovieId> {
        let duration = match u32::try_from(duration) {
            Ok(minutes) if minutes > 0 => minutes,
            _ => return Err(Error::InvalidDuration(duration)),
        };
        let movie = Movie {
            title: title.to_owned(),
            duration,
            description: description.to_owned(),
            url: url.to_owned(),
        };
        let movies = self.open_tree(MOVIES)?;
        let id = MovieId(self.generate_id()?);
        search_index(self)?.insert(
            &movies,
            id,
            &encode(&movie)?,
            &format!("{} {}", title, description),
        )?;
        debug!("added movie {:?} ({})", movie.title, id);
        Ok(id)
    }

    fn get_movie(&self, id: MovieId) -> Result<Movie> {
        let movies = self.open_tree(MOVIES)?;
        let data = movies.get(serialize_id(id.0))?.ok_or(Error::NotFound(id))?;
        decode(&data)
    }

    fn list_movies(&self) -> Result<Vec<(MovieId, Movie)>> {
        let movies = self.open_tree(MOVIES)?;
        movies
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                Ok((MovieId(deserialize_id(key)?), decode(&value)?))
            })
            .collect()
    }

    fn find_movie_by_title(&self, title: &str) -> Result<Option<(MovieId, Movie)>> {
        Ok(self
            .list_movies()?
            .into_iter()
            .find(|(_, movie)| movie.title == title))
    }

    fn search_movies(&self, query: &str) -> Result<Vec<(MovieId, f32)>> {
        search_index(self)?.query(query)
    }
}

/// Append-only log of play/skip events.
pub trait EventDb {
    fn record_event(
        &self,
        viewer: Viewer,
        movie_id: MovieId,
        timestamp: PlaybackTime,
        action: Action,
    ) -> Result<EventId>;
    fn events_for_movie(&self, movie_id: MovieId) -> Result<Vec<ViewEvent>>;
    /// Every event of every movie, in the order recorded.
    fn all_events(&self) -> Result<Vec<ViewEvent>>;

    /// Records a short fixed viewing session, for demos.
    fn simulate_watch(&self, viewer: Viewer, movie_id: MovieId) -> Result<Vec<EventId>> {
        let script = [
            ("00:03:00", Action::Play),
            ("00:10:15", Action::Skip),
            ("00:20:45", Action::Play),
        ];
        script
            .iter()
            .map(|(clock, action)| {
                let timestamp = PlaybackTime::parse_clock(clock)?;
                self.record_event(viewer, movie_id, timestamp, *action)
            })
            .collect()
    }
}

impl EventDb for sled::Db {
    fn record_event(
        &self,
        viewer: Viewer,
        movie_id: MovieId,
        timestamp: PlaybackTime,
        action: Action,
    ) -> Result<EventId> {
        let views = self.open_tree(VIEWS)?;
        let id = EventId(self.generate_id()?);
        let event = ViewEvent {
            id,
            viewer,
            movie_id,
            timestamp,
            action,
        };
        views.insert(movie_key(movie_id, id.0), encode(&event)?)?;
        debug!("movie {}: {} at {}", movie_id, action, timestamp);
        Ok(id)
    }

    fn events_for_movie(&self, movie_id: MovieId) -> Result<Vec<ViewEvent>> {
        let views = self.open_tree(VIEWS)?;
        decode_all(views.scan_prefix(serialize_id(movie_id.0)))
    }

    fn all_events(&self) -> Result<Vec<ViewEvent>> {
        let views = self.open_tree(VIEWS)?;
        let mut events: Vec<ViewEvent> = decode_all(views.iter())?;
        events.sort_by_key(|event| event.id);
        Ok(events)
    }
}

/// Append-only log of ratings and comments.
pub trait ReviewDb {
    fn record_review(
        &self,
        viewer: Viewer,
        movie_id: MovieId,
        rating: i64,
        comment: &str,
    ) -> Result<ReviewId>;
    fn reviews_for_movie(&self, movie_id: MovieId) -> Result<Vec<Review>>;
    /// Every review of every movie, grouped by movie.
    fn all_reviews(&self) -> Result<Vec<Review>>;

    /// `None` when the movie has no reviews.
    fn average_rating(&self, movie_id: MovieId) -> Result<Option<f64>> {
        let reviews = self.reviews_for_movie(movie_id)?;
        Ok(crate::analytics::average_rating(
            reviews.iter().map(|review| review.rating),
        ))
    }
}

impl ReviewDb for sled::Db {
    fn record_review(
        &self,
        viewer: Viewer,
        movie_id: MovieId,
        rating: i64,
        comment: &str,
    ) -> Result<ReviewId> {
        let rating = match u8::try_from(rating) {
            Ok(stars) if (1..=5).contains(&stars) => stars,
            _ => return Err(Error::InvalidRating(rating)),
        };
        let reviews = self.open_tree(REVIEWS)?;
        let id = ReviewId(self.generate_id()?);
        let review = Review {
            id,
            viewer,
            movie_id,
            rating,
            comment: comment.to_owned(),
        };
        reviews.insert(movie_key(movie_id, id.0), encode(&review)?)?;
        debug!("movie {}: review {} rated {}", movie_id, id, rating);
        Ok(id)
    }

    fn reviews_for_movie(&self, movie_id: MovieId) -> Result<Vec<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        decode_all(reviews.scan_prefix(serialize_id(movie_id.0)))
    }

    fn all_reviews(&self) -> Result<Vec<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        decode_all(reviews.iter())
    }
}

/// Progress reports from the playback widget.
pub trait SmartWatchDb {
    /// The timestamp is stored rounded to a tenth of a second.
    fn record_progress(
        &self,
        movie_id: MovieId,
        timestamp: PlaybackTime,
        event: &str,
    ) -> Result<EventId>;
    fn progress_for_movie(&self, movie_id: MovieId) -> Result<Vec<SmartWatchEvent>>;
}

impl SmartWatchDb for sled::Db {
    fn record_progress(
        &self,
        movie_id: MovieId,
        timestamp: PlaybackTime,
        event: &str,
    ) -> Result<EventId> {
        let smart_watch = self.open_tree(SMART_WATCH)?;
        let id = EventId(self.generate_id()?);
        let record = SmartWatchEvent {
            id,
            movie_id,
            timestamp: timestamp.to_tenths(),
            event: event.to_owned(),
        };
        smart_watch.insert(movie_key(movie_id, id.0), encode(&record)?)?;
        Ok(id)
    }

    fn progress_for_movie(&self, movie_id: MovieId) -> Result<Vec<SmartWatchEvent>> {
        let smart_watch = self.open_tree(SMART_WATCH)?;
        decode_all(smart_watch.scan_prefix(serialize_id(movie_id.0)))
    }
}
