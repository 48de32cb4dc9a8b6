//! Static city-pair distance table.
//!
//! The table ships inside the binary (`data/distances.csv`) and is parsed once
//! on first lookup. Pairs are symmetric: `(a, b)` and `(b, a)` resolve to the
//! same distance. City matching is case-insensitive on the trimmed name.

use std::collections::HashMap;
use std::sync::OnceLock;

const DISTANCES_CSV: &str = include_str!("../data/distances.csv");

fn table() -> &'static HashMap<(String, String), u32> {
    static TABLE: OnceLock<HashMap<(String, String), u32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        load_distances_csv(DISTANCES_CSV)
            .expect("embedded distance table must parse; it is validated by unit tests")
    })
}

/// Parse a `city_a,city_b,km` CSV into a symmetric-keyed map.
///
/// Rows with a zero distance are refused: a zero would silently produce a
/// free quote downstream.
pub fn load_distances_csv(content: &str) -> anyhow::Result<HashMap<(String, String), u32>> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut out = HashMap::new();

    for rec in rdr.records() {
        let rec = rec?;
        let a = normalize(&rec[0]);
        let b = normalize(&rec[1]);
        let km: u32 = rec[2].parse()?;
        if km == 0 {
            anyhow::bail!("zero distance for pair {a}/{b}");
        }
        out.insert(pair_key(&a, &b), km);
    }

    Ok(out)
}

fn normalize(city: &str) -> String {
    city.trim().to_lowercase()
}

// Order the two names so lookup is direction-independent.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Distance in km between two cities, if the pair is in the table.
pub fn lookup_km(origin: &str, destination: &str) -> Option<u32> {
    let key = pair_key(&normalize(origin), &normalize(destination));
    table().get(&key).copied()
}
