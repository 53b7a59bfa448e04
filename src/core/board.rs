//! The board: five ordered lists per delivery discipline.
//!
//! [`Board`] is the only place cards move between lists. Every move goes
//! through [`Board::move_to`], which keeps the per-discipline index in step
//! with the lists so an id is never present in two lists at once.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::message::{Discipline, MessageCard};

/// A list on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Received,
    Processing,
    Done,
    Failed,
    Dlq,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Received,
        Stage::Processing,
        Stage::Done,
        Stage::Failed,
        Stage::Dlq,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Dlq)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Processing => "processing",
            Stage::Done => "done",
            Stage::Failed => "failed",
            Stage::Dlq => "dlq",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a card currently sits, plus a counter bumped on every move.
///
/// Delayed transitions remember the epoch they were scheduled at, which lets
/// the engine drop timers that were overtaken by another move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub stage: Stage,
    pub epoch: u64,
}

/// The five lists of one discipline, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lanes {
    pub received: Vec<MessageCard>,
    pub processing: Vec<MessageCard>,
    pub done: Vec<MessageCard>,
    pub failed: Vec<MessageCard>,
    pub dlq: Vec<MessageCard>,

    #[serde(skip)]
    index: HashMap<String, Slot>,
}

impl Lanes {
    pub fn list(&self, stage: Stage) -> &[MessageCard] {
        match stage {
            Stage::Received => &self.received,
            Stage::Processing => &self.processing,
            Stage::Done => &self.done,
            Stage::Failed => &self.failed,
            Stage::Dlq => &self.dlq,
        }
    }

    fn list_mut(&mut self, stage: Stage) -> &mut Vec<MessageCard> {
        match stage {
            Stage::Received => &mut self.received,
            Stage::Processing => &mut self.processing,
            Stage::Done => &mut self.done,
            Stage::Failed => &mut self.failed,
            Stage::Dlq => &mut self.dlq,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ids in `stage`, in list order.
    pub fn ids(&self, stage: Stage) -> Vec<&str> {
        self.list(stage).iter().map(|c| c.id.as_str()).collect()
    }

    fn rebuild_index(&mut self) {
        let mut index = HashMap::new();
        for stage in Stage::ALL {
            for card in self.list(stage) {
                index.insert(card.id.clone(), Slot { stage, epoch: 0 });
            }
        }
        self.index = index;
    }
}

/// Both lane sets. Serialises as `{standard: {...}, fifo: {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub standard: Lanes,
    pub fifo: Lanes,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lanes(&self, discipline: Discipline) -> &Lanes {
        match discipline {
            Discipline::Standard => &self.standard,
            Discipline::Fifo => &self.fifo,
        }
    }

    fn lanes_mut(&mut self, discipline: Discipline) -> &mut Lanes {
        match discipline {
            Discipline::Standard => &mut self.standard,
            Discipline::Fifo => &mut self.fifo,
        }
    }

    pub fn slot(&self, discipline: Discipline, id: &str) -> Option<Slot> {
        self.lanes(discipline).index.get(id).copied()
    }

    pub fn locate(&self, discipline: Discipline, id: &str) -> Option<Stage> {
        self.slot(discipline, id).map(|s| s.stage)
    }

    pub fn get(&self, discipline: Discipline, id: &str) -> Option<&MessageCard> {
        let stage = self.locate(discipline, id)?;
        self.lanes(discipline)
            .list(stage)
            .iter()
            .find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, discipline: Discipline, id: &str) -> Option<&mut MessageCard> {
        let stage = self.locate(discipline, id)?;
        self.lanes_mut(discipline)
            .list_mut(stage)
            .iter_mut()
            .find(|c| c.id == id)
    }

    /// Appends a new card to `stage`. Hands the card back if its id is
    /// already tracked anywhere in the discipline's lanes.
    pub fn insert(
        &mut self,
        stage: Stage,
        card: MessageCard,
    ) -> Result<Slot, MessageCard> {
        let lanes = self.lanes_mut(card.discipline);
        if lanes.index.contains_key(&card.id) {
            return Err(card);
        }
        let slot = Slot { stage, epoch: 0 };
        lanes.index.insert(card.id.clone(), slot);
        lanes.list_mut(stage).push(card);
        Ok(slot)
    }

    /// Moves a card to the end of `to` and bumps its epoch.
    ///
    /// Returns `None` when the id is not tracked.
    pub fn move_to(
        &mut self,
        discipline: Discipline,
        id: &str,
        to: Stage,
    ) -> Option<(&mut MessageCard, Slot)> {
        let lanes = self.lanes_mut(discipline);
        let from = lanes.index.get(id)?.stage;
        let pos = lanes.list(from).iter().position(|c| c.id == id)?;

        let slot = lanes.index.get_mut(id)?;
        slot.stage = to;
        slot.epoch += 1;
        let moved = *slot;

        let card = lanes.list_mut(from).remove(pos);

        let target = lanes.list_mut(to);
        target.push(card);
        let card = target.last_mut()?;
        Some((card, moved))
    }

    /// Restores the id index after deserialising a snapshot.
    pub fn reindex(&mut self) {
        self.standard.rebuild_index();
        self.fifo.rebuild_index();
    }
}
