//! Struct-log execution traces and the random-access view the builder reads.

use bytes::Bytes;
use ethereum_types::{Address, BigEndianHash, H256, U256};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{errors::TraceError, opcodes::Opcode, stack_effect::CallKind};

/// One executed instruction with the machine state *before* it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub pc: usize,
    pub op: Opcode,
    pub gas: u64,
    #[serde(rename = "gasCost")]
    pub gas_cost: u64,
    /// Call depth, 1 for the transaction's own frame.
    pub depth: usize,
    /// Operand stack, bottom first.
    pub stack: Vec<U256>,
    pub memory: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct TraceStepInternal {
    pc: usize,
    op: Opcode,
    gas: u64,
    #[serde(rename = "gasCost")]
    gas_cost: u64,
    depth: usize,
    #[serde(default)]
    error: Option<String>,
    // stack is in hex 0x prefixed
    #[serde(default)]
    stack: Vec<String>,
    // memory is in chunks of 32 bytes, in hex
    #[serde(default)]
    memory: Vec<String>,
}

impl<'de> Deserialize<'de> for TraceStep {
    fn deserialize<D>(deserializer: D) -> Result<TraceStep, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = TraceStepInternal::deserialize(deserializer)?;
        let stack = s
            .stack
            .iter()
            .map(|word| parse_word(word))
            .collect::<Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        let memory = parse_memory(&s.memory).map_err(serde::de::Error::custom)?;
        Ok(TraceStep {
            pc: s.pc,
            op: s.op,
            gas: s.gas,
            gas_cost: s.gas_cost,
            depth: s.depth,
            stack,
            memory,
            error: s.error,
        })
    }
}

fn parse_word(word: &str) -> Result<U256, TraceError> {
    let digits = word.strip_prefix("0x").unwrap_or(word);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16).map_err(|_| TraceError::InvalidWord(word.to_string()))
}

fn parse_memory(chunks: &[String]) -> Result<Bytes, TraceError> {
    let mut memory = Vec::with_capacity(chunks.len() * 32);
    for chunk in chunks {
        let digits = chunk.strip_prefix("0x").unwrap_or(chunk);
        let bytes = hex::decode(digits).map_err(|_| TraceError::InvalidMemory(chunk.clone()))?;
        memory.extend_from_slice(&bytes);
    }
    Ok(Bytes::from(memory))
}

/// Address and context of the code running in one call frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameContext {
    /// Address whose code runs in this frame. For DELEGATECALL/CALLCODE this is
    /// the code address, not the storage owner.
    pub address: Address,
    pub is_creation: bool,
    pub call_data: Bytes,
}

/// How the transaction's own frame was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Callee, or the created contract for deployments.
    pub address: Address,
    pub is_creation: bool,
    pub call_data: Bytes,
}

/// Read-only, random-access view of an execution trace.
pub trait TraceProvider {
    fn steps(&self) -> &[TraceStep];

    fn step(&self, step: usize) -> Result<&TraceStep, TraceError> {
        self.steps()
            .get(step)
            .ok_or(TraceError::StepOutOfRange(step))
    }

    fn stack_at(&self, step: usize) -> Result<&[U256], TraceError> {
        self.step(step).map(|s| s.stack.as_slice())
    }

    fn memory_at(&self, step: usize) -> Result<&Bytes, TraceError> {
        self.step(step).map(|s| &s.memory)
    }

    fn call_data_at(&self, step: usize) -> Result<Bytes, TraceError>;

    fn current_called_address_at(&self, step: usize) -> Result<Address, TraceError>;

    fn is_creation_at(&self, step: usize) -> Result<bool, TraceError>;
}

/// An in-memory trace with frame contexts resolved up front.
#[derive(Debug, Clone)]
pub struct Trace {
    steps: Vec<TraceStep>,
    frames: Vec<FrameContext>,
    step_frames: Vec<usize>,
}

impl Trace {
    pub fn new(steps: Vec<TraceStep>, entry: TraceEntry) -> Self {
        let (frames, step_frames) = resolve_frames(&steps, entry);
        Self {
            steps,
            frames,
            step_frames,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn frame_at(&self, step: usize) -> Result<&FrameContext, TraceError> {
        self.step_frames
            .get(step)
            .and_then(|idx| self.frames.get(*idx))
            .ok_or(TraceError::StepOutOfRange(step))
    }
}

impl TraceProvider for Trace {
    fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    fn call_data_at(&self, step: usize) -> Result<Bytes, TraceError> {
        self.frame_at(step).map(|frame| frame.call_data.clone())
    }

    fn current_called_address_at(&self, step: usize) -> Result<Address, TraceError> {
        self.frame_at(step).map(|frame| frame.address)
    }

    fn is_creation_at(&self, step: usize) -> Result<bool, TraceError> {
        self.frame_at(step).map(|frame| frame.is_creation)
    }
}

/// The `n`-th word from the top of a bottom-first stack.
pub(crate) fn peek(stack: &[U256], n: usize) -> Option<U256> {
    stack
        .len()
        .checked_sub(n + 1)
        .and_then(|idx| stack.get(idx))
        .copied()
}

fn word_to_address(word: U256) -> Address {
    Address::from(H256::from_uint(&word))
}

fn memory_slice(memory: &Bytes, offset: U256, length: U256) -> Bytes {
    let (Ok(offset), Ok(length)) = (usize::try_from(offset), usize::try_from(length)) else {
        return Bytes::new();
    };
    let mut data = vec![0u8; length];
    if let Some(available) = memory.get(offset..) {
        let copied = available.len().min(length);
        if let (Some(dst), Some(src)) = (data.get_mut(..copied), available.get(..copied)) {
            dst.copy_from_slice(src);
        }
    }
    Bytes::from(data)
}

fn callee_context(step: &TraceStep, kind: CallKind) -> FrameContext {
    let stack = &step.stack;
    let address = peek(stack, 1).map(word_to_address).unwrap_or_default();
    let args = match kind {
        CallKind::Call | CallKind::CallCode => Some((3, 4)),
        CallKind::DelegateCall | CallKind::StaticCall => Some((2, 3)),
        CallKind::Create | CallKind::Create2 => None,
    };
    match args {
        Some((offset, length)) => FrameContext {
            address,
            is_creation: false,
            call_data: match (peek(stack, offset), peek(stack, length)) {
                (Some(offset), Some(length)) => memory_slice(&step.memory, offset, length),
                _ => Bytes::new(),
            },
        },
        // The created address is only known once the frame returns.
        None => FrameContext {
            address: Address::zero(),
            is_creation: true,
            call_data: Bytes::new(),
        },
    }
}

fn resolve_frames(steps: &[TraceStep], entry: TraceEntry) -> (Vec<FrameContext>, Vec<usize>) {
    let mut frames = vec![FrameContext {
        address: entry.address,
        is_creation: entry.is_creation,
        call_data: entry.call_data,
    }];
    // (frame index, depth of its steps)
    let mut open = vec![(0usize, steps.first().map_or(1, |step| step.depth))];
    let mut step_frames = Vec::with_capacity(steps.len());

    for (idx, step) in steps.iter().enumerate() {
        let current = open.last().map_or(0, |(frame, _)| *frame);
        step_frames.push(current);
        let Some(next) = steps.get(idx + 1) else {
            break;
        };

        if next.depth > step.depth {
            let context = match step.op.call_kind() {
                Some(kind) => callee_context(step, kind),
                None => FrameContext {
                    address: Address::zero(),
                    is_creation: false,
                    call_data: Bytes::new(),
                },
            };
            frames.push(context);
            open.push((frames.len() - 1, next.depth));
        } else if next.depth < step.depth {
            let mut returned = None;
            while open.len() > 1 && open.last().is_some_and(|(_, depth)| *depth > next.depth) {
                returned = open.pop().map(|(frame, _)| frame);
            }
            // Only the outermost finished frame hands its result to `next`.
            if let Some(frame) = returned.and_then(|finished| frames.get_mut(finished)) {
                if frame.is_creation {
                    frame.address = next
                        .stack
                        .last()
                        .copied()
                        .map(word_to_address)
                        .unwrap_or_default();
                }
            }
        }
    }
    (frames, step_frames)
}
