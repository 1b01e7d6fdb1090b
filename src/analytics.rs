//! Engagement summaries computed from the event and review logs.
//!
//! The functions here are pure folds over already stored records; the
//! [`AnalyticsDb`] trait wires them to the stores.

use crate::database::{EventDb, ReviewDb, SmartWatchDb};
use crate::error::{Error, Result};
use crate::model::*;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_SEGMENT_WIDTH: u32 = 10;

/// Width of a heatmap bucket in whole seconds. Never zero.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWidth(u32);

impl SegmentWidth {
    pub fn new(secs: u32) -> Result<SegmentWidth> {
        if secs == 0 {
            Err(Error::InvalidSegmentWidth)
        } else {
            Ok(SegmentWidth(secs))
        }
    }

    pub fn secs(self) -> u32 {
        self.0
    }
}

impl Default for SegmentWidth {
    fn default() -> SegmentWidth {
        SegmentWidth(DEFAULT_SEGMENT_WIDTH)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionCount {
    pub timestamp: PlaybackTime,
    pub action: Action,
    pub count: u64,
}

/// Counts events per (timestamp, action), ordered by timestamp and then action name.
pub fn action_histogram<'a, I>(events: I) -> Vec<ActionCount>
where
    I: IntoIterator<Item = &'a ViewEvent>,
{
    let mut groups: BTreeMap<(PlaybackTime, Action), u64> = BTreeMap::new();
    for event in events {
        *groups.entry((event.timestamp, event.action)).or_insert(0) += 1;
    }
    groups
        .into_iter()
        .map(|((timestamp, action), count)| ActionCount {
            timestamp,
            action,
            count,
        })
        .collect()
}

/// Start of the segment containing `t`: `floor(t / width) * width`.
///
/// Saturates instead of overflowing for offsets beyond what `PlaybackTime` accepts.
pub fn segment_of(t: PlaybackTime, width: SegmentWidth) -> u64 {
    let width = u64::from(width.secs());
    ((t.as_secs() / width as f64).floor() as u64).saturating_mul(width)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCount {
    /// Inclusive, in seconds.
    pub start: u64,
    /// Exclusive, in seconds.
    pub end: u64,
    pub views: u64,
}

/// Buckets timestamps into segments, ascending by start. Empty segments are omitted.
pub fn segment_counts<I>(timestamps: I, width: SegmentWidth) -> Vec<SegmentCount>
where
    I: IntoIterator<Item = PlaybackTime>,
{
    let mut buckets: BTreeMap<u64, u64> = BTreeMap::new();
    for t in timestamps {
        *buckets.entry(segment_of(t, width)).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(start, views)| SegmentCount {
            start,
            end: start.saturating_add(u64::from(width.secs())),
            views,
        })
        .collect()
}

/// The most viewed segment; on a tie the earliest one.
pub fn peak_segment(segments: &[SegmentCount]) -> Option<SegmentCount> {
    segments
        .iter()
        .copied()
        .max_by(|a, b| a.views.cmp(&b.views).then(b.start.cmp(&a.start)))
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Heatmap {
    pub width: SegmentWidth,
    pub segments: Vec<SegmentCount>,
    pub peak: Option<SegmentCount>,
    pub total_views: u64,
}

impl Heatmap {
    pub fn from_timestamps<I>(timestamps: I, width: SegmentWidth) -> Heatmap
    where
        I: IntoIterator<Item = PlaybackTime>,
    {
        let segments = segment_counts(timestamps, width);
        Heatmap {
            width,
            peak: peak_segment(&segments),
            total_views: segments.iter().map(|segment| segment.views).sum(),
            segments,
        }
    }
}

/// Arithmetic mean, or `None` for no ratings.
pub fn average_rating<I>(ratings: I) -> Option<f64>
where
    I: IntoIterator<Item = u8>,
{
    let (sum, count) = ratings
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), rating| {
            (sum + u64::from(rating), count + 1)
        });
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct MovieRating {
    pub movie_id: MovieId,
    pub average: f64,
    pub reviews: u64,
}

/// Average rating of every movie that has reviews, ordered by movie id.
pub fn average_ratings<'a, I>(reviews: I) -> Vec<MovieRating>
where
    I: IntoIterator<Item = &'a Review>,
{
    let mut totals: BTreeMap<MovieId, (u64, u64)> = BTreeMap::new();
    for review in reviews {
        let entry = totals.entry(review.movie_id).or_insert((0, 0));
        entry.0 += u64::from(review.rating);
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|(movie_id, (sum, reviews))| MovieRating {
            movie_id,
            average: sum as f64 / reviews as f64,
            reviews,
        })
        .collect()
}

pub trait AnalyticsDb {
    /// Heatmap of a movie's playback progress reports.
    fn heatmap_for_movie(&self, movie_id: MovieId, width: SegmentWidth) -> Result<Heatmap>;
    /// Action histogram over the events of every movie.
    fn engagement_summary(&self) -> Result<Vec<ActionCount>>;
    fn rating_summary(&self) -> Result<Vec<MovieRating>>;
}

impl<T: EventDb + ReviewDb + SmartWatchDb> AnalyticsDb for T {
    fn heatmap_for_movie(&self, movie_id: MovieId, width: SegmentWidth) -> Result<Heatmap> {
        let progress = self.progress_for_movie(movie_id)?;
        Ok(Heatmap::from_timestamps(
            progress.iter().map(|event| event.timestamp),
            width,
        ))
    }

    fn engagement_summary(&self) -> Result<Vec<ActionCount>> {
        Ok(action_histogram(&self.all_events()?))
    }

    fn rating_summary(&self) -> Result<Vec<MovieRating>> {
        Ok(average_ratings(&self.all_reviews()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: f64) -> PlaybackTime {
        PlaybackTime::from_secs(secs).unwrap()
    }

    fn event(id: u64, secs: f64, action: Action) -> ViewEvent {
        ViewEvent {
            id: EventId(id),
            viewer: None,
            movie_id: MovieId(1),
            timestamp: at(secs),
            action,
        }
    }

    fn width(secs: u32) -> SegmentWidth {
        SegmentWidth::new(secs).unwrap()
    }

    #[test]
    fn histogram_groups_and_orders() {
        let events = vec![
            event(1, 615.0, Action::Skip),
            event(2, 180.0, Action::Play),
            event(3, 615.0, Action::Play),
            event(4, 180.0, Action::Play),
            event(5, 615.0, Action::Skip),
        ];
        let histogram = action_histogram(&events);
        let rows: Vec<(f64, Action, u64)> = histogram
            .iter()
            .map(|row| (row.timestamp.as_secs(), row.action, row.count))
            .collect();
        assert_eq!(
            rows,
            vec![
                (180.0, Action::Play, 2),
                (615.0, Action::Play, 1),
                (615.0, Action::Skip, 2),
            ]
        );
    }

    #[test]
    fn histogram_of_nothing_is_empty() {
        assert!(action_histogram(Vec::<ViewEvent>::new().iter()).is_empty());
    }

    #[test]
    fn segment_formula() {
        let w = width(10);
        assert_eq!(segment_of(at(0.0), w), 0);
        assert_eq!(segment_of(at(9.99), w), 0);
        assert_eq!(segment_of(at(10.0), w), 10);
        assert_eq!(segment_of(at(12.0), w), 10);
        assert_eq!(segment_of(at(1245.0), w), 1240);
        assert_eq!(segment_of(at(7.0), width(3)), 6);
    }

    #[test]
    fn segments_at_the_largest_offset() {
        let latest = at(crate::model::MAX_PLAYBACK_SECS);
        assert_eq!(segment_of(latest, width(10)), 4_294_967_290);
        assert_eq!(segment_of(latest, width(u32::MAX)), u64::from(u32::MAX));
        let segments = segment_counts(vec![at(0.0), latest], width(u32::MAX));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].start, u64::from(u32::MAX));
        assert_eq!(segments[1].end, 2 * u64::from(u32::MAX));

        // stored records bypass `from_secs`; bucketing them must still not overflow
        let stored: PlaybackTime =
            bincode::deserialize(&bincode::serialize(&1e20f64).unwrap()).unwrap();
        assert_eq!(segment_of(stored, width(10)), u64::MAX);
        let heatmap = Heatmap::from_timestamps(vec![stored], width(10));
        assert_eq!(heatmap.segments[0].end, u64::MAX);
        assert_eq!(heatmap.total_views, 1);
    }

    #[test]
    fn segment_counts_conserve_events() {
        let timestamps: Vec<PlaybackTime> = (0..200).map(|i| at(i as f64 * 1.7)).collect();
        for w in &[1, 3, 10, 60, 1000] {
            let segments = segment_counts(timestamps.iter().copied(), width(*w));
            let total: u64 = segments.iter().map(|segment| segment.views).sum();
            assert_eq!(total, timestamps.len() as u64);
            assert!(segments.windows(2).all(|pair| pair[0].start < pair[1].start));
            assert!(segments
                .iter()
                .all(|segment| segment.start % u64::from(*w) == 0
                    && segment.end == segment.start + u64::from(*w)));
        }
    }

    #[test]
    fn scenario_heatmap() {
        let events = vec![
            event(1, 5.0, Action::Play),
            event(2, 12.0, Action::Play),
            event(3, 12.0, Action::Skip),
        ];
        let heatmap =
            Heatmap::from_timestamps(events.iter().map(|event| event.timestamp), width(10));
        assert_eq!(
            heatmap.segments,
            vec![
                SegmentCount {
                    start: 0,
                    end: 10,
                    views: 1
                },
                SegmentCount {
                    start: 10,
                    end: 20,
                    views: 2
                },
            ]
        );
        assert_eq!(heatmap.peak.map(|peak| peak.start), Some(10));
        assert_eq!(heatmap.total_views, 3);
    }

    #[test]
    fn peak_tie_breaks_to_earliest() {
        let segments = vec![
            SegmentCount {
                start: 0,
                end: 10,
                views: 1,
            },
            SegmentCount {
                start: 20,
                end: 30,
                views: 4,
            },
            SegmentCount {
                start: 50,
                end: 60,
                views: 4,
            },
        ];
        assert_eq!(peak_segment(&segments).unwrap().start, 20);
        let mut reversed = segments.clone();
        reversed.reverse();
        assert_eq!(peak_segment(&reversed).unwrap().start, 20);
    }

    #[test]
    fn no_data_has_no_peak() {
        let heatmap = Heatmap::from_timestamps(Vec::<PlaybackTime>::new(), SegmentWidth::default());
        assert!(heatmap.segments.is_empty());
        assert_eq!(heatmap.peak, None);
        assert_eq!(heatmap.total_views, 0);
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(SegmentWidth::new(0).is_err());
        assert_eq!(SegmentWidth::default().secs(), 10);
    }

    #[test]
    fn averages() {
        assert_eq!(average_rating(vec![5u8, 3, 4]), Some(4.0));
        assert_eq!(average_rating(Vec::<u8>::new()), None);

        let review = |id: u64, movie: u64, rating: u8| Review {
            id: ReviewId(id),
            viewer: None,
            movie_id: MovieId(movie),
            rating,
            comment: String::new(),
        };
        let reviews = vec![review(1, 2, 5), review(2, 1, 2), review(3, 2, 4)];
        assert_eq!(
            average_ratings(&reviews),
            vec![
                MovieRating {
                    movie_id: MovieId(1),
                    average: 2.0,
                    reviews: 1
                },
                MovieRating {
                    movie_id: MovieId(2),
                    average: 4.5,
                    reviews: 2
                },
            ]
        );
    }

    #[test]
    fn reads_from_the_stores() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let movie = MovieId(9);
        for secs in &[5.0, 12.0, 12.04, 31.0] {
            db.record_progress(movie, at(*secs), "play").unwrap();
        }
        let heatmap = db.heatmap_for_movie(movie, width(10)).unwrap();
        let views: Vec<(u64, u64)> = heatmap
            .segments
            .iter()
            .map(|segment| (segment.start, segment.views))
            .collect();
        assert_eq!(views, vec![(0, 1), (10, 2), (30, 1)]);
        assert_eq!(heatmap.peak.unwrap().start, 10);
        assert!(db.heatmap_for_movie(MovieId(10), width(10)).unwrap().peak.is_none());

        db.simulate_watch(None, movie).unwrap();
        db.simulate_watch(Some(UserId(1)), movie).unwrap();
        let summary = db.engagement_summary().unwrap();
        assert_eq!(summary.len(), 3);
        assert!(summary.iter().all(|row| row.count == 2));

        db.record_review(None, movie, 3, "").unwrap();
        db.record_review(None, movie, 4, "").unwrap();
        assert_eq!(
            db.rating_summary().unwrap(),
            vec![MovieRating {
                movie_id: movie,
                average: 3.5,
                reviews: 2
            }]
        );
    }
}
