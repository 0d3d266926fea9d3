//! Trajectory writers.
//!
//! A [`TrajectoryWriter`] buffers the steps of the current episode as rows of columns and
//! forwards items created from them to replay tables. Rows can be appended partially and
//! completed by a later append, which is how an adder stores an observation before the action
//! taken on it is known.
use crate::{error::MarlError, table::PriorityTable, Extras, Nest, Transition};
use anyhow::{anyhow, Result};
use log::debug;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

/// A table shared between a writer and its readers.
pub type SharedTable = Arc<Mutex<PriorityTable<Transition>>>;

/// A row of the episode buffer. Each column may be unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepRow {
    /// Observation of the step.
    pub observation: Option<Nest>,

    /// Extras of the step.
    pub extras: Option<Extras>,

    /// Action taken on the observation.
    pub action: Option<Nest>,

    /// Reward received after the action.
    pub reward: Option<Nest>,

    /// Environment discount received after the action.
    pub discount: Option<Nest>,

    /// N-step return of the window ending at this row.
    pub n_step_return: Option<Nest>,

    /// Cumulative discount of the window ending at this row.
    pub total_discount: Option<Nest>,
}

fn merge_column<T>(name: &str, dst: &mut Option<T>, src: Option<T>) -> Result<(), MarlError> {
    if let Some(v) = src {
        if dst.is_some() {
            return Err(MarlError::Validation(format!(
                "column {} is already set in the open row",
                name
            )));
        }
        *dst = Some(v);
    }
    Ok(())
}

impl StepRow {
    /// A row holding an observation and its extras.
    pub fn observation(observation: Nest, extras: Extras) -> Self {
        Self {
            observation: Some(observation),
            extras: Some(extras),
            ..Default::default()
        }
    }

    /// A row holding an action with the reward and discount that followed it.
    pub fn action(action: Nest, reward: Nest, discount: Nest) -> Self {
        Self {
            action: Some(action),
            reward: Some(reward),
            discount: Some(discount),
            ..Default::default()
        }
    }

    /// A row holding derived n-step quantities.
    pub fn derived(n_step_return: Nest, total_discount: Nest) -> Self {
        Self {
            n_step_return: Some(n_step_return),
            total_discount: Some(total_discount),
            ..Default::default()
        }
    }

    /// Moves the columns of `other` into `self`. Fails if a column is set in both.
    pub fn merge(&mut self, other: StepRow) -> Result<(), MarlError> {
        merge_column("observation", &mut self.observation, other.observation)?;
        merge_column("extras", &mut self.extras, other.extras)?;
        merge_column("action", &mut self.action, other.action)?;
        merge_column("reward", &mut self.reward, other.reward)?;
        merge_column("discount", &mut self.discount, other.discount)?;
        merge_column("n_step_return", &mut self.n_step_return, other.n_step_return)?;
        merge_column("total_discount", &mut self.total_discount, other.total_discount)
    }
}

/// Buffers the rows of an episode and sends items to replay tables.
pub trait TrajectoryWriter {
    /// Rows of the current episode in order.
    fn history(&self) -> &[StepRow];

    /// Appends a row.
    ///
    /// If the last row is still open, `step` is merged into it. With `partial_step` the row
    /// stays open for further columns, otherwise it is closed and counted as a step.
    fn append(&mut self, step: StepRow, partial_step: bool) -> Result<()>;

    /// Queues an item for insertion into `table`.
    fn create_item(&mut self, table: &str, priority: f64, transition: Transition) -> Result<()>;

    /// Inserts queued items until at most `max_in_flight_items` remain queued.
    fn flush(&mut self, max_in_flight_items: usize) -> Result<()>;

    /// Number of closed rows since the start of the episode.
    fn episode_steps(&self) -> usize;

    /// Inserts all queued items and clears the episode buffer.
    fn end_episode(&mut self) -> Result<()>;
}

/// A [`TrajectoryWriter`] inserting items into in-process [`PriorityTable`]s.
pub struct EpisodeWriter {
    rows: Vec<StepRow>,
    open: bool,
    episode_steps: usize,
    in_flight: VecDeque<(String, f64, Transition)>,
    tables: BTreeMap<String, SharedTable>,
}

impl EpisodeWriter {
    /// Creates a writer sending items to the given tables, keyed by table name.
    pub fn new(tables: impl IntoIterator<Item = SharedTable>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for table in tables {
            let name = table
                .lock()
                .map_err(|_| anyhow!("table lock poisoned"))?
                .name()
                .to_string();
            if map.insert(name.clone(), table).is_some() {
                return Err(MarlError::Configuration(format!("duplicate table {}", name)).into());
            }
        }

        Ok(Self {
            rows: vec![],
            open: false,
            episode_steps: 0,
            in_flight: VecDeque::new(),
            tables: map,
        })
    }

    /// The destination table with the given name.
    pub fn table(&self, name: &str) -> Option<SharedTable> {
        self.tables.get(name).cloned()
    }

    /// Names of the destination tables.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Number of created items not yet inserted.
    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl TrajectoryWriter for EpisodeWriter {
    fn history(&self) -> &[StepRow] {
        &self.rows
    }

    fn append(&mut self, step: StepRow, partial_step: bool) -> Result<()> {
        match self.rows.last_mut() {
            Some(row) if self.open => row.merge(step)?,
            _ => self.rows.push(step),
        }
        self.open = partial_step;
        if !partial_step {
            self.episode_steps += 1;
        }
        Ok(())
    }

    fn create_item(&mut self, table: &str, priority: f64, transition: Transition) -> Result<()> {
        if !self.tables.contains_key(table) {
            return Err(MarlError::UnknownTable(table.to_string()).into());
        }
        self.in_flight
            .push_back((table.to_string(), priority, transition));
        Ok(())
    }

    fn flush(&mut self, max_in_flight_items: usize) -> Result<()> {
        while self.in_flight.len() > max_in_flight_items {
            let (name, priority, transition) = match self.in_flight.pop_front() {
                Some(item) => item,
                None => break,
            };
            let table = self
                .tables
                .get(&name)
                .ok_or_else(|| MarlError::UnknownTable(name.clone()))?;
            table
                .lock()
                .map_err(|_| anyhow!("lock of table {} poisoned", name))?
                .insert(transition, priority as f32)?;
        }
        Ok(())
    }

    fn episode_steps(&self) -> usize {
        self.episode_steps
    }

    fn end_episode(&mut self) -> Result<()> {
        self.flush(0)?;
        debug!("End of episode after {} steps", self.episode_steps);
        self.rows.clear();
        self.open = false;
        self.episode_steps = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PriorityTableConfig;

    fn writer() -> EpisodeWriter {
        let table = PriorityTable::build(&PriorityTableConfig::default().capacity(10)).unwrap();
        EpisodeWriter::new([Arc::new(Mutex::new(table))]).unwrap()
    }

    #[test]
    fn test_partial_rows_are_merged() {
        let mut w = writer();
        w.append(StepRow::observation(Nest::scalar(0.0), Extras::default()), true)
            .unwrap();
        assert_eq!(w.episode_steps(), 0);
        w.append(
            StepRow::action(Nest::scalar(1.0), Nest::scalar(1.0), Nest::scalar(1.0)),
            false,
        )
        .unwrap();
        assert_eq!(w.episode_steps(), 1);
        assert_eq!(w.history().len(), 1);
        assert!(w.history()[0].action.is_some());

        let err = w
            .append(StepRow::observation(Nest::scalar(0.0), Extras::default()), true)
            .and_then(|_| w.append(StepRow::observation(Nest::scalar(0.0), Extras::default()), true));
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_table() {
        let mut w = writer();
        let t = Transition {
            observation: Nest::scalar(0.0),
            extras: Extras::default(),
            action: Nest::scalar(0.0),
            reward: Nest::scalar(0.0),
            discount: Nest::scalar(0.0),
            next_observation: Nest::scalar(0.0),
            next_extras: Extras::default(),
        };
        let err = w.create_item("missing", 1.0, t.clone()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MarlError>(),
            Some(&MarlError::UnknownTable("missing".to_string()))
        );

        w.create_item("priority_table", 1.0, t.clone()).unwrap();
        w.create_item("priority_table", 1.0, t).unwrap();
        w.flush(1).unwrap();
        assert_eq!(w.num_in_flight(), 1);
        w.end_episode().unwrap();
        assert_eq!(w.num_in_flight(), 0);
        assert_eq!(w.table("priority_table").unwrap().lock().unwrap().len(), 2);
    }
}
