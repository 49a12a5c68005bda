//! Attaching proposed change-units to the graph.
//!
//! Whatever proposes new units (a schema diff, or the `make` command for an
//! empty unit) hands them over per app with temporary names. Arrangement
//! numbers them after the app's current leaf and links them into the graph.

use super::{ChangeGraph, ChangeKey, ChangeUnit, Questioner};
use std::collections::BTreeMap;

const MAX_SUGGESTED_NAME: usize = 100;

/// Leading integer of a unit name, e.g. `12` for `0012_add_email`.
pub fn parse_number(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Name for a unit nobody named, from the current time.
pub fn suggest_name() -> String {
    chrono::Local::now().format("auto_%Y%m%d_%H%M").to_string()
}

/// Number and link proposed units.
///
/// Per app, units are named `NNNN_<name>` continuing from the app's leaf
/// (`0001_initial` when the app has no units yet). The first unit depends
/// on that leaf. An app without units only gets one if the questioner
/// agrees; otherwise its proposals are dropped and references to them
/// point at `__first__` of the app. Dependencies between proposals are
/// rewritten to the new names.
pub fn arrange_for_graph(
    mut changes: BTreeMap<String, Vec<ChangeUnit>>,
    graph: &ChangeGraph,
    questioner: &dyn Questioner,
    name: Option<&str>,
) -> BTreeMap<String, Vec<ChangeUnit>> {
    let mut name_map: BTreeMap<ChangeKey, ChangeKey> = BTreeMap::new();

    changes.retain(|app, units| {
        if units.is_empty() {
            return true;
        }
        let leaf = graph.leaf_nodes(Some(app.as_str())).into_iter().next();

        if leaf.is_none() && !questioner.ask_initial(app) {
            for unit in units.iter() {
                name_map.insert(unit.key(), ChangeKey::first(app.as_str()));
            }
            return false;
        }

        let mut next_number = leaf
            .as_ref()
            .map_or(1, |leaf| parse_number(&leaf.name).unwrap_or(0) + 1);

        for (i, unit) in units.iter_mut().enumerate() {
            let label = match (name, i, &leaf) {
                (Some(name), _, _) => name.to_string(),
                (None, 0, None) => "initial".to_string(),
                _ => suggest_name().chars().take(MAX_SUGGESTED_NAME).collect(),
            };
            if i == 0 {
                match &leaf {
                    Some(leaf) => unit.dependencies.push(leaf.clone()),
                    None => unit.initial = true,
                }
            }
            let new_name = format!("{next_number:04}_{label}");
            name_map.insert(unit.key(), ChangeKey::new(app.as_str(), new_name.as_str()));
            unit.app = app.clone();
            unit.name = new_name;
            next_number += 1;
        }
        true
    });

    for units in changes.values_mut() {
        for unit in units.iter_mut() {
            for dependency in unit.dependencies.iter_mut() {
                if let Some(renamed) = name_map.get(dependency) {
                    *dependency = renamed.clone();
                }
            }
        }
    }
    changes
}
