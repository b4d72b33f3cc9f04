//! Runtime signal graph: an arena of module instances linked by `sendto` /
//! `recvfrom` handles.
//!
//! Links are plain handles, so cycles are representable, but a correct
//! configuration is always a DAG. A module is taken out of its slot while one
//! of its callbacks runs; reaching it again before it returns is reported as
//! `ModemError::Reentrant` instead of recursing forever.
//!
//! Pull requests are answered by push: when a module calls `Port::pull`, its
//! slot switches to collecting mode and whatever upstream emits towards it is
//! gathered and handed back as the pull result.

use crate::error::{ModemError, Result};
use crate::module::{Block, Buffer, Command, Module, Reply, UnitType};
use crate::registry::{KindId, ModuleConfig, Registry};
use crate::signal::SignalBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

struct Slot {
    module: Option<Box<dyn Module>>,
    kind: &'static str,
    input: Option<UnitType>,
    output: Option<UnitType>,
    fan_out: bool,
    sendto: Vec<ModuleId>,
    recvfrom: Option<ModuleId>,
    collecting: Option<Buffer>,
}

pub struct Graph {
    slots: Vec<Option<Slot>>,
}

impl Graph {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Take ownership of a constructed module.
    pub fn insert(&mut self, module: Box<dyn Module>) -> ModuleId {
        let id = ModuleId(self.slots.len());
        log::debug!("graph: insert {:?} `{}`", id, module.kind());
        self.slots.push(Some(Slot {
            kind: module.kind(),
            input: module.input_unit(),
            output: module.output_unit(),
            fan_out: module.fan_out(),
            module: Some(module),
            sendto: Vec::new(),
            recvfrom: None,
            collecting: None,
        }));
        id
    }

    /// Construct a module of `kind` through the registry and insert it.
    /// Nothing is inserted when construction fails.
    pub fn create(
        &mut self,
        registry: &Registry,
        kind: KindId,
        config: &ModuleConfig,
    ) -> Result<ModuleId> {
        let module = registry.create(kind, config)?;
        Ok(self.insert(module))
    }

    /// Destroy a module. Its neighbours lose their links to it.
    pub fn remove(&mut self, id: ModuleId) -> Result<()> {
        self.disconnect_all(id)?;
        let slot = self.slots[id.0].take();
        if let Some(slot) = slot {
            log::debug!("graph: remove {:?} `{}`", id, slot.kind);
        }
        Ok(())
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self, id: ModuleId) -> Result<&'static str> {
        Ok(self.slot(id)?.kind)
    }

    pub fn sendto(&self, id: ModuleId) -> Result<&[ModuleId]> {
        Ok(&self.slot(id)?.sendto)
    }

    pub fn recvfrom(&self, id: ModuleId) -> Result<Option<ModuleId>> {
        Ok(self.slot(id)?.recvfrom)
    }

    /// Link `src -> dst`. Units must agree. A non-fan-out source drops its
    /// previous downstream link, and `dst` drops its previous upstream.
    pub fn connect(&mut self, src: ModuleId, dst: ModuleId) -> Result<()> {
        let output = self.slot(src)?.output.ok_or(ModemError::Direction {
            kind: self.slot(src)?.kind,
            operation: "emit output",
        })?;
        let input = self.slot(dst)?.input.ok_or(ModemError::Direction {
            kind: self.slot(dst)?.kind,
            operation: "accept input",
        })?;
        if output != input {
            return Err(ModemError::UnitMismatch {
                expected: input,
                found: output,
            });
        }

        if !self.slot(src)?.fan_out {
            let old = std::mem::take(&mut self.slot_mut(src)?.sendto);
            for down in old {
                if let Ok(slot) = self.slot_mut(down) {
                    if slot.recvfrom == Some(src) {
                        slot.recvfrom = None;
                    }
                }
            }
        }
        if let Some(up) = self.slot(dst)?.recvfrom {
            if up != src {
                if let Ok(slot) = self.slot_mut(up) {
                    slot.sendto.retain(|&d| d != dst);
                }
            }
        }

        let sendto = &mut self.slot_mut(src)?.sendto;
        if !sendto.contains(&dst) {
            sendto.push(dst);
        }
        self.slot_mut(dst)?.recvfrom = Some(src);
        log::debug!("graph: connect {:?} -> {:?}", src, dst);
        Ok(())
    }

    pub fn disconnect(&mut self, src: ModuleId, dst: ModuleId) -> Result<()> {
        self.slot_mut(src)?.sendto.retain(|&d| d != dst);
        let slot = self.slot_mut(dst)?;
        if slot.recvfrom == Some(src) {
            slot.recvfrom = None;
        }
        Ok(())
    }

    fn disconnect_all(&mut self, id: ModuleId) -> Result<()> {
        let (sendto, recvfrom) = {
            let slot = self.slot_mut(id)?;
            (std::mem::take(&mut slot.sendto), slot.recvfrom.take())
        };
        for down in sendto {
            if let Ok(slot) = self.slot_mut(down) {
                if slot.recvfrom == Some(id) {
                    slot.recvfrom = None;
                }
            }
        }
        if let Some(up) = recvfrom {
            if let Ok(slot) = self.slot_mut(up) {
                slot.sendto.retain(|&d| d != id);
            }
        }
        Ok(())
    }

    /// Deliver `block` to `id`. Returns the units consumed.
    pub fn push(&mut self, id: ModuleId, block: Block<'_>, signals: &mut SignalBus) -> Result<usize> {
        let slot = self.slot_mut(id)?;
        match slot.input {
            None => {
                return Err(ModemError::Direction {
                    kind: slot.kind,
                    operation: "accept input",
                })
            }
            Some(unit) if unit != block.unit() => {
                return Err(ModemError::UnitMismatch {
                    expected: unit,
                    found: block.unit(),
                })
            }
            Some(_) => {}
        }
        if let Some(inbox) = slot.collecting.as_mut() {
            inbox.append(block)?;
            return Ok(block.len());
        }
        let mut module = slot.module.take().ok_or(ModemError::Reentrant(id))?;
        let result = {
            let mut port = Port {
                graph: &mut *self,
                signals: &mut *signals,
                id,
            };
            module.handle_input(block, &mut port)
        };
        self.restore(id, module);
        result
    }

    /// Ask `id` to produce `units` output units.
    pub fn demand(&mut self, id: ModuleId, units: usize, signals: &mut SignalBus) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let mut module = slot.module.take().ok_or(ModemError::Reentrant(id))?;
        let result = {
            let mut port = Port {
                graph: &mut *self,
                signals: &mut *signals,
                id,
            };
            module.handle_demand(units, &mut port)
        };
        self.restore(id, module);
        result
    }

    pub fn command(&mut self, id: ModuleId, command: Command) -> Result<Reply> {
        let slot = self.slot_mut(id)?;
        match slot.module.as_mut() {
            Some(module) => module.command(command),
            None => Err(ModemError::Reentrant(id)),
        }
    }

    fn restore(&mut self, id: ModuleId, module: Box<dyn Module>) {
        if let Some(Some(slot)) = self.slots.get_mut(id.0) {
            slot.module = Some(module);
        }
    }

    fn slot(&self, id: ModuleId) -> Result<&Slot> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ModemError::InvalidModule(id))
    }

    fn slot_mut(&mut self, id: ModuleId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ModemError::InvalidModule(id))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// A module's view of the graph during one of its callbacks.
pub struct Port<'g> {
    graph: &'g mut Graph,
    signals: &'g mut SignalBus,
    id: ModuleId,
}

impl<'g> Port<'g> {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn signals(&mut self) -> &mut SignalBus {
        &mut *self.signals
    }

    pub fn is_connected_downstream(&self) -> bool {
        self.graph
            .slot(self.id)
            .map(|s| !s.sendto.is_empty())
            .unwrap_or(false)
    }

    /// Send `block` to every downstream module. With no downstream link the
    /// data is dropped and reported as consumed. With several, the smallest
    /// consumption is returned.
    pub fn emit(&mut self, block: Block<'_>) -> Result<usize> {
        let fan = self.graph.slot(self.id)?.sendto.len();
        let mut consumed = block.len();
        for i in 0..fan {
            let target = match self.graph.slot(self.id)?.sendto.get(i) {
                Some(&target) => target,
                None => break,
            };
            let taken = self.graph.push(target, block, &mut *self.signals)?;
            consumed = consumed.min(taken);
        }
        Ok(consumed)
    }

    /// Request `units` from upstream and return what it produced, or `None`
    /// when nothing is connected upstream.
    pub fn pull(&mut self, units: usize) -> Result<Option<Buffer>> {
        let slot = self.graph.slot(self.id)?;
        let Some(upstream) = slot.recvfrom else {
            return Ok(None);
        };
        let unit = slot.input.ok_or(ModemError::Direction {
            kind: slot.kind,
            operation: "pull input",
        })?;
        self.graph.slot_mut(self.id)?.collecting = Some(Buffer::empty(unit));
        let result = self.graph.demand(upstream, units, &mut *self.signals);
        let inbox = self.graph.slot_mut(self.id)?.collecting.take();
        result?;
        Ok(inbox)
    }
}
