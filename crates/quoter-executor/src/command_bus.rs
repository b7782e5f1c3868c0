//! Per-tick command buffering and coalescing.
//!
//! Commands are buffered per symbol and tagged with the tick that produced
//! them. Draining turns each symbol's buffer into the fewest wire calls:
//!
//! - every Cancel becomes part of one batch cancel (ids de-duplicated)
//! - Places are chunked into batches of at most `max_place_batch`,
//!   preserving enqueue order
//! - Amends are never merged and come out one by one, in enqueue order
//!
//! Output order per symbol is cancels, then places, then amends. The bus
//! performs no I/O; flushing the drained batches is the caller's job.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quoter_core::{ClientOrderId, OrderSide, Price, Size};
use quoter_gateway::{CancelTarget, PlaceRequest};
use quoter_telemetry::Metrics;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Place,
    Cancel,
    Amend,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Place => "place",
            Self::Cancel => "cancel",
            Self::Amend => "amend",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandParams {
    Place(PlaceRequest),
    Cancel(CancelTarget),
    Amend {
        client_order_id: ClientOrderId,
        price: Option<Price>,
        qty: Option<Size>,
    },
}

/// One buffered intent. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub symbol: String,
    pub params: CommandParams,
    pub timestamp_ms: u64,
    /// Tick that enqueued the command, set by the bus.
    pub tick_id: u64,
}

impl Command {
    pub fn place(request: PlaceRequest, timestamp_ms: u64) -> Self {
        Self {
            symbol: request.symbol().to_string(),
            params: CommandParams::Place(request),
            timestamp_ms,
            tick_id: 0,
        }
    }

    pub fn cancel(target: CancelTarget, timestamp_ms: u64) -> Self {
        Self {
            symbol: target.symbol.clone(),
            params: CommandParams::Cancel(target),
            timestamp_ms,
            tick_id: 0,
        }
    }

    pub fn amend(
        symbol: impl Into<String>,
        client_order_id: ClientOrderId,
        price: Option<Price>,
        qty: Option<Size>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            params: CommandParams::Amend {
                client_order_id,
                price,
                qty,
            },
            timestamp_ms,
            tick_id: 0,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self.params {
            CommandParams::Place(_) => CommandKind::Place,
            CommandParams::Cancel(_) => CommandKind::Cancel,
            CommandParams::Amend { .. } => CommandKind::Amend,
        }
    }
}

/// Coalesced unit of work for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    BatchCancel {
        symbol: String,
        targets: Vec<CancelTarget>,
    },
    BatchPlace {
        symbol: String,
        requests: Vec<PlaceRequest>,
    },
    Amend {
        symbol: String,
        client_order_id: ClientOrderId,
        price: Option<Price>,
        qty: Option<Size>,
    },
}

impl BatchCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::BatchCancel { .. } => CommandKind::Cancel,
            Self::BatchPlace { .. } => CommandKind::Place,
            Self::Amend { .. } => CommandKind::Amend,
        }
    }

    /// Number of orders the batch touches.
    pub fn len(&self) -> usize {
        match self {
            Self::BatchCancel { targets, .. } => targets.len(),
            Self::BatchPlace { requests, .. } => requests.len(),
            Self::Amend { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// BusConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Wire-level cap on orders per batch place.
    #[serde(default = "default_max_place_batch")]
    pub max_place_batch: usize,
}

fn default_max_place_batch() -> usize {
    20
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_place_batch: default_max_place_batch(),
        }
    }
}

// ============================================================================
// CommandBus
// ============================================================================

#[derive(Debug)]
pub struct CommandBus {
    config: BusConfig,
    buffers: Mutex<HashMap<String, Vec<Command>>>,
    current_tick: AtomicU64,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl CommandBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            buffers: Mutex::new(HashMap::new()),
            current_tick: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Tag subsequent commands with `tick_id`.
    pub fn begin_tick(&self, tick_id: u64) {
        self.current_tick.store(tick_id, Ordering::Release);
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }

    pub fn enqueue(&self, mut command: Command) {
        command.tick_id = self.current_tick();
        debug!(
            symbol = %command.symbol,
            kind = command.kind().as_str(),
            tick = command.tick_id,
            "Command enqueued"
        );
        self.buffers
            .lock()
            .entry(command.symbol.clone())
            .or_default()
            .push(command);
    }

    /// Buffered commands across all symbols.
    pub fn pending_len(&self) -> usize {
        self.buffers.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Buffered commands for one symbol, in enqueue order.
    pub fn pending_for(&self, symbol: &str) -> Vec<Command> {
        self.buffers.lock().get(symbol).cloned().unwrap_or_default()
    }

    /// Levels and notional of places staged but not yet flushed.
    pub fn staged_places(&self, symbol: &str, side: OrderSide) -> (usize, Decimal) {
        let buffers = self.buffers.lock();
        let Some(commands) = buffers.get(symbol) else {
            return (0, Decimal::ZERO);
        };
        commands
            .iter()
            .filter_map(|c| match &c.params {
                CommandParams::Place(req) if req.order.side == side => Some(req.order.notional()),
                _ => None,
            })
            .fold((0, Decimal::ZERO), |(n, usd), notional| (n + 1, usd + notional))
    }

    /// Drain every buffer into coalesced batches, keyed by symbol.
    pub fn coalesce_and_drain(&self) -> BTreeMap<String, Vec<BatchCommand>> {
        let drained: Vec<(String, Vec<Command>)> = self.buffers.lock().drain().collect();
        drained
            .into_iter()
            .filter(|(_, commands)| !commands.is_empty())
            .map(|(symbol, commands)| {
                let batches = self.coalesce(&symbol, commands);
                (symbol, batches)
            })
            .collect()
    }

    /// Drain one symbol's buffer into coalesced batches.
    pub fn drain_symbol(&self, symbol: &str) -> Vec<BatchCommand> {
        let commands = self.buffers.lock().remove(symbol).unwrap_or_default();
        if commands.is_empty() {
            return Vec::new();
        }
        self.coalesce(symbol, commands)
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.buffers.lock().clear();
    }

    fn coalesce(&self, symbol: &str, commands: Vec<Command>) -> Vec<BatchCommand> {
        let mut targets: Vec<CancelTarget> = Vec::new();
        let mut seen: HashSet<CancelTarget> = HashSet::new();
        let mut places: Vec<PlaceRequest> = Vec::new();
        let mut amends: Vec<BatchCommand> = Vec::new();
        let mut cancel_commands = 0usize;

        for command in commands {
            match command.params {
                CommandParams::Cancel(target) => {
                    cancel_commands += 1;
                    if seen.insert(target.clone()) {
                        targets.push(target);
                    }
                }
                CommandParams::Place(request) => places.push(request),
                CommandParams::Amend {
                    client_order_id,
                    price,
                    qty,
                } => amends.push(BatchCommand::Amend {
                    symbol: symbol.to_string(),
                    client_order_id,
                    price,
                    qty,
                }),
            }
        }

        let mut out = Vec::new();
        if !targets.is_empty() {
            Metrics::coalesced("cancel", cancel_commands);
            out.push(BatchCommand::BatchCancel {
                symbol: symbol.to_string(),
                targets,
            });
        }
        if !places.is_empty() {
            Metrics::coalesced("place", places.len());
            let chunk = self.config.max_place_batch.max(1);
            let mut rest = places;
            while !rest.is_empty() {
                let tail = rest.split_off(rest.len().min(chunk));
                out.push(BatchCommand::BatchPlace {
                    symbol: symbol.to_string(),
                    requests: rest,
                });
                rest = tail;
            }
        }
        out.extend(amends);
        out
    }
}
