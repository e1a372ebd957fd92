use std::collections::HashMap;

use serde::Serialize;

use crate::db::models::PickDetailRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionEntry {
    /// Selected code as stored; may be outside the known entity set.
    pub code: String,
    pub eliminations: usize,
    pub most_recent_period: i64,
}

/// Eliminating results grouped by selected entity, most damaging first.
/// Ties go to the entity that eliminated someone most recently.
pub fn elimination_attribution(picks: &[PickDetailRow]) -> Vec<AttributionEntry> {
    let mut by_code: HashMap<&str, (usize, i64)> = HashMap::new();
    for pick in picks.iter().filter(|p| p.is_elimination()) {
        let Some(code) = pick.entity_code.as_deref() else {
            continue;
        };
        let entry = by_code.entry(code).or_insert((0, pick.period));
        entry.0 += 1;
        entry.1 = entry.1.max(pick.period);
    }

    let mut out: Vec<AttributionEntry> = by_code
        .into_iter()
        .map(|(code, (eliminations, most_recent_period))| AttributionEntry {
            code: code.to_string(),
            eliminations,
            most_recent_period,
        })
        .collect();
    out.sort_by(|a, b| {
        b.eliminations
            .cmp(&a.eliminations)
            .then(b.most_recent_period.cmp(&a.most_recent_period))
            .then(a.code.cmp(&b.code))
    });
    out
}
