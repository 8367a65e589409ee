//! Search plan: configured terms x locations x sources expanded into an
//! ordered task list. Pure; no I/O.

use jobsweep_adapters::render_template;
use jobsweep_core::SearchTask;
use tracing::warn;

use crate::config::CollectionConfig;
use crate::retry::RunContext;

/// Configured locations after blank entries are dropped and the run cap applied.
pub fn effective_locations(config: &CollectionConfig) -> Vec<String> {
    let locations = config
        .locations
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if locations.len() > config.max_locations {
        warn!(
            configured = locations.len(),
            max = config.max_locations,
            "too many locations; extra ones are skipped this run"
        );
    }
    locations.into_iter().take(config.max_locations).collect()
}

/// Tasks ordered by location, then term, then source. Disabled sources (by
/// config or by run state) get no tasks.
pub fn build_plan(config: &CollectionConfig, ctx: &RunContext) -> Vec<SearchTask> {
    let terms = config
        .terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();
    let sources = config
        .enabled_sources()
        .filter(|s| !ctx.is_disabled(&s.name))
        .collect::<Vec<_>>();

    let mut tasks = Vec::new();
    for location in effective_locations(config) {
        for term in &terms {
            for source in &sources {
                let mut task = SearchTask {
                    index: tasks.len(),
                    term: term.to_string(),
                    query: term.to_string(),
                    location: location.clone(),
                    source: source.name.clone(),
                    results_wanted: source.results_wanted.unwrap_or(config.results_wanted),
                    hours_old: source.hours_old.unwrap_or(config.hours_old),
                    params: source.params.clone(),
                };
                if let Some(template) = &source.search_term_template {
                    task.query = render_template(template, &task, term, false);
                }
                tasks.push(task);
            }
        }
    }
    tasks
}
