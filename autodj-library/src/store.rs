//! SQLite persistence for what the advisor has learned
//!
//! A save replaces the whole stored snapshot; the advisor's own ring
//! buffers already bound its size.

use std::path::Path;

use autodj_analysis::advisor::{LearningEntry, TransitionRecord, UserAdjustments};
use autodj_analysis::{
    AudioCharacteristics, EffectSpec, EnergyLevels, FilterSpec, FilterType, LearningSnapshot,
    Thresholds, TrackHints,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt learning data: {0}")]
    Corrupt(String),
}

pub struct LearningStore {
    conn: Connection,
}

impl LearningStore {
    const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            rating INTEGER NOT NULL,
            energy TEXT NOT NULL,
            characteristics INTEGER NOT NULL,
            effects TEXT NOT NULL,
            has_adjustments INTEGER NOT NULL,
            adjusted_filters INTEGER NOT NULL,
            adjusted_effects TEXT,
            genre TEXT,
            artist TEXT,
            hint_energy REAL,
            valence REAL
        );
        CREATE TABLE IF NOT EXISTS filters (
            entry_id INTEGER NOT NULL,
            adjusted INTEGER NOT NULL,
            position INTEGER NOT NULL,
            filter_type TEXT NOT NULL,
            frequency_hz REAL NOT NULL,
            gain_db REAL NOT NULL,
            q REAL
        );
        CREATE INDEX IF NOT EXISTS idx_filters_entry ON filters(entry_id);
        CREATE TABLE IF NOT EXISTS thresholds (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            low REAL NOT NULL,
            medium REAL NOT NULL,
            high REAL NOT NULL
        );
        CREATE TABLE IF NOT EXISTS transitions (
            key TEXT PRIMARY KEY,
            success REAL NOT NULL,
            count INTEGER NOT NULL
        );
    "#;

    /// Open or create a store at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    /// Replace the stored snapshot
    pub fn save(&mut self, snapshot: &LearningSnapshot) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM entries; DELETE FROM filters; DELETE FROM thresholds; DELETE FROM transitions;",
        )?;

        for (id, entry) in snapshot.entries.iter().enumerate() {
            let id = id as i64;
            let adjustments = entry.adjustments.as_ref();
            tx.execute(
                r#"INSERT INTO entries
                   (id, timestamp, rating, energy, characteristics, effects,
                    has_adjustments, adjusted_filters, adjusted_effects,
                    genre, artist, hint_energy, valence)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
                params![
                    id,
                    entry.timestamp,
                    entry.rating,
                    join_floats(&entry.energy.as_array()),
                    characteristics_bits(&entry.characteristics),
                    effects_text(&entry.effects),
                    adjustments.is_some(),
                    adjustments.is_some_and(|a| a.filters.is_some()),
                    adjustments.and_then(|a| a.effects.as_ref()).map(effects_text),
                    entry.hints.genre,
                    entry.hints.artist,
                    entry.hints.energy,
                    entry.hints.valence,
                ],
            )?;

            let adjusted_filters = adjustments.and_then(|a| a.filters.as_deref()).unwrap_or(&[]);
            let groups = [(false, entry.filters.as_slice()), (true, adjusted_filters)];
            for (adjusted, filters) in groups {
                for (position, f) in filters.iter().enumerate() {
                    tx.execute(
                        r#"INSERT INTO filters
                           (entry_id, adjusted, position, filter_type, frequency_hz, gain_db, q)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                        params![
                            id,
                            adjusted,
                            position as i64,
                            f.filter_type.as_str(),
                            f.frequency_hz,
                            f.gain_db,
                            f.q,
                        ],
                    )?;
                }
            }
        }

        if let Some(t) = snapshot.thresholds {
            tx.execute(
                "INSERT INTO thresholds (id, low, medium, high) VALUES (1, ?1, ?2, ?3)",
                params![t.low, t.medium, t.high],
            )?;
        }
        for (key, record) in &snapshot.transitions {
            tx.execute(
                "INSERT INTO transitions (key, success, count) VALUES (?1, ?2, ?3)",
                params![key, record.success, record.count],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            entries = snapshot.entries.len(),
            transitions = snapshot.transitions.len(),
            "learning saved"
        );
        Ok(())
    }

    /// Load the stored snapshot (empty when nothing was saved)
    pub fn load(&self) -> Result<LearningSnapshot, StoreError> {
        let mut filters: Vec<(i64, bool, FilterSpec)> = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT entry_id, adjusted, filter_type, frequency_hz, gain_db, q
                 FROM filters ORDER BY entry_id, adjusted, position",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(2)?;
                let filter_type = FilterType::parse(&name)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown filter type {name}")))?;
                filters.push((
                    row.get(0)?,
                    row.get(1)?,
                    FilterSpec {
                        filter_type,
                        frequency_hz: row.get(3)?,
                        gain_db: row.get(4)?,
                        q: row.get(5)?,
                    },
                ));
            }
        }

        let mut entries = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, timestamp, rating, energy, characteristics, effects,
                        has_adjustments, adjusted_filters, adjusted_effects,
                        genre, artist, hint_energy, valence
                 FROM entries ORDER BY id",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                entries.push(entry_from_row(row, &filters)?);
            }
        }

        let thresholds = self
            .conn
            .query_row("SELECT low, medium, high FROM thresholds WHERE id = 1", [], |row| {
                Ok(Thresholds {
                    low: row.get(0)?,
                    medium: row.get(1)?,
                    high: row.get(2)?,
                })
            })
            .optional()?;

        let mut stmt = self
            .conn
            .prepare("SELECT key, success, count FROM transitions ORDER BY key")?;
        let transitions = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TransitionRecord {
                        success: row.get(1)?,
                        count: row.get(2)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LearningSnapshot {
            entries,
            thresholds,
            transitions,
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "DELETE FROM entries; DELETE FROM filters; DELETE FROM thresholds; DELETE FROM transitions;",
        )?;
        Ok(())
    }
}

fn entry_from_row(row: &Row<'_>, filters: &[(i64, bool, FilterSpec)]) -> Result<LearningEntry, StoreError> {
    let id: i64 = row.get(0)?;
    let energy = parse_floats::<7>(&row.get::<_, String>(3)?)?;
    let filters_of = |adjusted: bool| -> Vec<FilterSpec> {
        filters
            .iter()
            .filter(|(entry, a, _)| *entry == id && *a == adjusted)
            .map(|(_, _, f)| *f)
            .collect()
    };

    let has_adjustments: bool = row.get(6)?;
    let adjustments = if has_adjustments {
        let adjusted_filters: bool = row.get(7)?;
        let effects = row
            .get::<_, Option<String>>(8)?
            .map(|text| parse_effects(&text))
            .transpose()?;
        Some(UserAdjustments {
            filters: adjusted_filters.then(|| filters_of(true)),
            effects,
        })
    } else {
        None
    };

    Ok(LearningEntry {
        energy: EnergyLevels {
            sub_bass: energy[0],
            bass: energy[1],
            low_mid: energy[2],
            mid: energy[3],
            high_mid: energy[4],
            high: energy[5],
            very_high: energy[6],
        },
        characteristics: characteristics_from_bits(row.get(4)?),
        filters: filters_of(false),
        effects: parse_effects(&row.get::<_, String>(5)?)?,
        rating: row.get(2)?,
        adjustments,
        hints: TrackHints {
            genre: row.get(9)?,
            artist: row.get(10)?,
            energy: row.get(11)?,
            valence: row.get(12)?,
        },
        timestamp: row.get(1)?,
    })
}

fn characteristics_bits(c: &AudioCharacteristics) -> u32 {
    [
        c.is_bassy,
        c.is_mid_heavy,
        c.is_high_heavy,
        c.is_balanced,
        c.is_dynamic,
        c.needs_clarity,
        c.needs_warmth,
    ]
    .iter()
    .enumerate()
    .fold(0, |bits, (i, set)| if *set { bits | 1 << i } else { bits })
}

fn characteristics_from_bits(bits: u32) -> AudioCharacteristics {
    let bit = |i: u32| bits & (1 << i) != 0;
    AudioCharacteristics {
        is_bassy: bit(0),
        is_mid_heavy: bit(1),
        is_high_heavy: bit(2),
        is_balanced: bit(3),
        is_dynamic: bit(4),
        needs_clarity: bit(5),
        needs_warmth: bit(6),
    }
}

fn effects_text(e: &EffectSpec) -> String {
    join_floats(&[e.reverb, e.delay, e.delay_time_secs, e.feedback])
}

fn parse_effects(text: &str) -> Result<EffectSpec, StoreError> {
    let [reverb, delay, delay_time_secs, feedback] = parse_floats::<4>(text)?;
    Ok(EffectSpec {
        reverb,
        delay,
        delay_time_secs,
        feedback,
    })
}

fn join_floats(values: &[f32]) -> String {
    values.iter().map(f32::to_string).collect::<Vec<_>>().join(",")
}

fn parse_floats<const N: usize>(text: &str) -> Result<[f32; N], StoreError> {
    let mut out = [0.0; N];
    let mut parts = text.split(',');
    for slot in out.iter_mut() {
        *slot = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| StoreError::Corrupt(format!("expected {N} numbers in {text:?}")))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rating: u8, adjustments: Option<UserAdjustments>) -> LearningEntry {
        LearningEntry {
            energy: EnergyLevels {
                sub_bass: 0.1,
                bass: 0.82,
                low_mid: 0.4,
                mid: 0.55,
                high_mid: 0.3,
                high: 0.25,
                very_high: 0.05,
            },
            characteristics: AudioCharacteristics {
                is_bassy: true,
                needs_clarity: true,
                ..AudioCharacteristics::default()
            },
            filters: vec![
                FilterSpec::new(FilterType::LowShelf, 100.0, -2.0),
                FilterSpec::new(FilterType::Peaking, 3000.0, 1.5).with_q(0.7),
            ],
            effects: EffectSpec::default(),
            rating,
            adjustments,
            hints: TrackHints {
                genre: Some("house".to_string()),
                artist: None,
                energy: Some(0.7),
                valence: None,
            },
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_empty_store() {
        let store = LearningStore::in_memory().unwrap();
        assert_eq!(store.load().unwrap(), LearningSnapshot::default());
    }

    #[test]
    fn test_snapshot_survives_a_save() {
        let mut store = LearningStore::in_memory().unwrap();
        let snapshot = LearningSnapshot {
            entries: vec![
                entry(5, None),
                entry(
                    2,
                    Some(UserAdjustments {
                        filters: Some(vec![FilterSpec::new(FilterType::HighShelf, 8000.0, 3.0)]),
                        effects: Some(EffectSpec {
                            reverb: 0.4,
                            ..EffectSpec::default()
                        }),
                    }),
                ),
                entry(3, Some(UserAdjustments::default())),
            ],
            thresholds: Some(Thresholds {
                low: 0.25,
                medium: 0.55,
                high: 0.75,
            }),
            transitions: vec![(
                "house-techno-130-130".to_string(),
                TransitionRecord {
                    success: 7.5,
                    count: 3,
                },
            )],
        };

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_save_replaces() {
        let mut store = LearningStore::in_memory().unwrap();
        let first = LearningSnapshot {
            entries: vec![entry(4, None), entry(5, None)],
            ..LearningSnapshot::default()
        };
        store.save(&first).unwrap();

        let second = LearningSnapshot {
            entries: vec![entry(1, None)],
            ..LearningSnapshot::default()
        };
        store.save(&second).unwrap();
        assert_eq!(store.load().unwrap(), second);

        store.clear().unwrap();
        assert!(store.load().unwrap().entries.is_empty());
    }

    #[test]
    fn test_characteristic_bits() {
        let c = AudioCharacteristics {
            is_high_heavy: true,
            needs_warmth: true,
            ..AudioCharacteristics::default()
        };
        assert_eq!(characteristics_bits(&c), 0b100_0100);
        assert_eq!(characteristics_from_bits(0b100_0100), c);
    }

    #[test]
    fn test_corrupt_numbers() {
        assert!(parse_floats::<4>("1,2,3").is_err());
        assert_eq!(parse_floats::<2>("0.5, 1").unwrap(), [0.5, 1.0]);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autodj").join("learning.db");
        let mut store = LearningStore::open(&path).unwrap();
        store.save(&LearningSnapshot::default()).unwrap();
        drop(store);
        assert!(LearningStore::open(&path).unwrap().load().unwrap().entries.is_empty());
    }
}
