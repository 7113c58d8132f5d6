//! Domain model: the denormalized filmwork aggregate and the raw join rows
//! it is folded from.
//!
//! The relational source stores works, persons and genres normalized across
//! five tables; the index wants one nested document per work. [`FilmworkSet`]
//! performs that reconstruction: it folds a stream of LEFT JOIN rows into
//! deduplicated aggregates, preserving first-seen order so a given row order
//! always produces the same output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// A person associated with a filmwork, in any role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
}

/// A genre tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
}

/// The role a person plays on a filmwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Actor,
    Director,
    Writer,
}

impl Role {
    /// Parse the lowercase role text stored in the relational source.
    ///
    /// Unknown role text is dropped with a warning rather than failing the
    /// whole batch; the filmwork itself still gets indexed.
    pub fn parse(text: &str) -> Option<Role> {
        match text {
            "actor" => Some(Role::Actor),
            "director" => Some(Role::Director),
            "writer" => Some(Role::Writer),
            other => {
                warn!(role = other, "ignoring unknown person role");
                None
            }
        }
    }
}

/// One result row of the denormalizing LEFT JOIN query.
///
/// A row carries the scalar fields of its work (redundantly repeated across
/// all rows for the same work) plus at most one person-role pair and at most
/// one genre. Works with fewer associations than the join fans out to show
/// up with NULL person/genre columns.
#[derive(Debug, Clone)]
pub struct RawJoinRow {
    pub work_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub role: Option<Role>,
    pub person_id: Option<Uuid>,
    pub person_name: Option<String>,
    pub genre_id: Option<Uuid>,
    pub genre_name: Option<String>,
}

/// The denormalized document indexed per work.
///
/// The `*_names` vectors repeat the person names as flat strings; the index
/// mapping searches those directly without touching the nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filmwork {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub actors: Vec<Person>,
    pub directors: Vec<Person>,
    pub writers: Vec<Person>,
    pub actors_names: Vec<String>,
    pub directors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub genres: Vec<Genre>,
}

impl Filmwork {
    /// Initialize an aggregate from the scalar fields of its first row.
    ///
    /// Later rows for the same work never overwrite these fields; they are
    /// identical across rows by construction of the join.
    pub fn from_row(row: &RawJoinRow) -> Self {
        Self {
            id: row.work_id,
            title: row.title.clone(),
            description: row.description.clone(),
            imdb_rating: row.rating,
            kind: row.kind.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            actors: Vec::new(),
            directors: Vec::new(),
            writers: Vec::new(),
            actors_names: Vec::new(),
            directors_names: Vec::new(),
            writers_names: Vec::new(),
            genres: Vec::new(),
        }
    }

    /// Append a person to the collection for `role`, deduplicated by id.
    ///
    /// First occurrence wins and insertion order is preserved. Dedup is by
    /// id, not full value equality, so two sightings of the same person with
    /// a name edited mid-sync cannot produce a duplicate entry.
    pub fn add_person(&mut self, role: Role, person: Person) {
        let (people, names) = match role {
            Role::Actor => (&mut self.actors, &mut self.actors_names),
            Role::Director => (&mut self.directors, &mut self.directors_names),
            Role::Writer => (&mut self.writers, &mut self.writers_names),
        };
        if people.iter().any(|existing| existing.id == person.id) {
            return;
        }
        names.push(person.name.clone());
        people.push(person);
    }

    /// Append a genre, deduplicated by id, preserving insertion order.
    pub fn add_genre(&mut self, genre: Genre) {
        if self.genres.iter().any(|existing| existing.id == genre.id) {
            return;
        }
        self.genres.push(genre);
    }
}

/// Accumulator folding raw join rows into one aggregate per work id.
///
/// Output order is the order in which work ids were first seen, which keeps
/// the result deterministic for a given row order.
#[derive(Debug, Default)]
pub struct FilmworkSet {
    order: Vec<Uuid>,
    films: HashMap<Uuid, Filmwork>,
}

impl FilmworkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one join row into the set.
    ///
    /// Creates the aggregate on first sight of its work id, then attaches
    /// the row's person and genre if present. Rows with NULL person and
    /// genre columns still establish the aggregate but attach nothing.
    pub fn insert_row(&mut self, row: RawJoinRow) {
        if !self.films.contains_key(&row.work_id) {
            self.order.push(row.work_id);
        }
        let film = self
            .films
            .entry(row.work_id)
            .or_insert_with(|| Filmwork::from_row(&row));

        if let (Some(role), Some(person_id)) = (row.role, row.person_id) {
            film.add_person(
                role,
                Person {
                    id: person_id,
                    name: row.person_name.unwrap_or_default(),
                },
            );
        }
        if let Some(genre_id) = row.genre_id {
            film.add_genre(Genre {
                id: genre_id,
                name: row.genre_name.unwrap_or_default(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Hand the aggregates off in first-seen order, consuming the set.
    pub fn into_vec(mut self) -> Vec<Filmwork> {
        self.order
            .iter()
            .filter_map(|id| self.films.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(work_id: Uuid) -> RawJoinRow {
        RawJoinRow {
            work_id,
            title: "The Test".to_string(),
            description: Some("a film about tests".to_string()),
            rating: Some(7.5),
            kind: "movie".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            role: None,
            person_id: None,
            person_name: None,
            genre_id: None,
            genre_name: None,
        }
    }

    fn with_person(mut r: RawJoinRow, role: Role, id: Uuid, name: &str) -> RawJoinRow {
        r.role = Some(role);
        r.person_id = Some(id);
        r.person_name = Some(name.to_string());
        r
    }

    fn with_genre(mut r: RawJoinRow, id: Uuid, name: &str) -> RawJoinRow {
        r.genre_id = Some(id);
        r.genre_name = Some(name.to_string());
        r
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("actor"), Some(Role::Actor));
        assert_eq!(Role::parse("director"), Some(Role::Director));
        assert_eq!(Role::parse("writer"), Some(Role::Writer));
        assert_eq!(Role::parse("producer"), None);
    }

    #[test]
    fn test_fan_out_merges_into_one_aggregate() {
        let work = Uuid::new_v4();
        let (a, b, drama) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut set = FilmworkSet::new();
        set.insert_row(with_person(row(work), Role::Actor, a, "A"));
        set.insert_row(with_person(row(work), Role::Actor, b, "B"));
        set.insert_row(with_genre(row(work), drama, "Drama"));

        let films = set.into_vec();
        assert_eq!(films.len(), 1);
        let film = &films[0];
        assert_eq!(film.actors.len(), 2);
        assert_eq!(film.actors[0].name, "A");
        assert_eq!(film.actors[1].name, "B");
        assert_eq!(film.actors_names, vec!["A", "B"]);
        assert_eq!(film.genres.len(), 1);
        assert_eq!(film.genres[0].name, "Drama");
    }

    #[test]
    fn test_dedup_is_by_id_not_by_value() {
        let work = Uuid::new_v4();
        let person = Uuid::new_v4();

        let mut set = FilmworkSet::new();
        set.insert_row(with_person(row(work), Role::Writer, person, "Old Name"));
        // Same person seen again with an edited name must not duplicate.
        set.insert_row(with_person(row(work), Role::Writer, person, "New Name"));

        let films = set.into_vec();
        assert_eq!(films[0].writers.len(), 1);
        assert_eq!(films[0].writers[0].name, "Old Name");
        assert_eq!(films[0].writers_names, vec!["Old Name"]);
    }

    #[test]
    fn test_same_person_in_two_roles() {
        let work = Uuid::new_v4();
        let person = Uuid::new_v4();

        let mut set = FilmworkSet::new();
        set.insert_row(with_person(row(work), Role::Actor, person, "Clint"));
        set.insert_row(with_person(row(work), Role::Director, person, "Clint"));

        let films = set.into_vec();
        assert_eq!(films[0].actors.len(), 1);
        assert_eq!(films[0].directors.len(), 1);
    }

    #[test]
    fn test_null_row_establishes_scalars_only() {
        let work = Uuid::new_v4();

        let mut set = FilmworkSet::new();
        set.insert_row(row(work));

        let films = set.into_vec();
        assert_eq!(films.len(), 1);
        let film = &films[0];
        assert_eq!(film.title, "The Test");
        assert_eq!(film.imdb_rating, Some(7.5));
        assert!(film.actors.is_empty());
        assert!(film.directors.is_empty());
        assert!(film.writers.is_empty());
        assert!(film.genres.is_empty());
    }

    #[test]
    fn test_scalars_set_once_from_first_row() {
        let work = Uuid::new_v4();

        let mut set = FilmworkSet::new();
        set.insert_row(row(work));
        let mut later = row(work);
        later.title = "Renamed".to_string();
        set.insert_row(later);

        let films = set.into_vec();
        assert_eq!(films[0].title, "The Test");
    }

    #[test]
    fn test_output_preserves_first_seen_order() {
        let (first, second, third) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut set = FilmworkSet::new();
        set.insert_row(row(first));
        set.insert_row(row(second));
        set.insert_row(row(third));
        set.insert_row(row(first)); // revisiting must not reorder

        let ids: Vec<Uuid> = set.into_vec().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn test_document_serializes_with_nested_collections() {
        let work = Uuid::new_v4();
        let mut set = FilmworkSet::new();
        set.insert_row(with_genre(row(work), Uuid::new_v4(), "Drama"));

        let films = set.into_vec();
        let doc = serde_json::to_value(&films[0]).unwrap();
        assert_eq!(doc["title"], "The Test");
        assert_eq!(doc["genres"][0]["name"], "Drama");
        assert!(doc["actors"].as_array().unwrap().is_empty());
    }
}
