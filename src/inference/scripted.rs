//! In-memory inference context for tests
//!
//! Tracks every live position the way the llama.cpp memory would and rejects
//! decodes that reuse a position or fall outside the context.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::inference::context::{BatchToken, InferenceContext, Token};
use crate::inference::engine::EngineError;

pub const EOG: Token = Token(2);
const FILLER: Token = Token(7);

pub struct ScriptedContext {
    capacity: u32,
    batch_size: usize,
    prompt_len: usize,
    fail_special: bool,
    fail_plain: bool,
    replies: VecDeque<Token>,
    pieces: HashMap<i32, Vec<u8>>,
    live: BTreeMap<u32, Token>,
    fail_decode_at: Option<usize>,
    refuse_eviction: bool,
    pub decode_calls: usize,
    pub sample_calls: usize,
    pub tokenize_calls: RefCell<Vec<(bool, bool)>>,
    pub batch_sizes: Vec<usize>,
    pub logits_requests: Vec<u32>,
    pub highest_pos: Option<u32>,
}

impl ScriptedContext {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            batch_size: capacity as usize,
            prompt_len: 4,
            fail_special: false,
            fail_plain: false,
            replies: VecDeque::new(),
            pieces: HashMap::new(),
            live: BTreeMap::new(),
            fail_decode_at: None,
            refuse_eviction: false,
            decode_calls: 0,
            sample_calls: 0,
            tokenize_calls: RefCell::new(Vec::new()),
            batch_sizes: Vec::new(),
            logits_requests: Vec::new(),
            highest_pos: None,
        }
    }

    /// Every tokenization yields `len` tokens
    pub fn with_prompt_len(mut self, len: usize) -> Self {
        self.prompt_len = len;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Tokens handed out by `sample`, in order; filler afterwards
    pub fn with_replies(mut self, replies: &[Token]) -> Self {
        self.replies = replies.iter().copied().collect();
        self
    }

    pub fn with_piece(mut self, token: Token, bytes: &[u8]) -> Self {
        self.pieces.insert(token.0, bytes.to_vec());
        self
    }

    pub fn failing_special_parse(mut self) -> Self {
        self.fail_special = true;
        self
    }

    pub fn failing_plain_parse(mut self) -> Self {
        self.fail_plain = true;
        self
    }

    /// Fail the `n`th decode call (0-based)
    pub fn failing_decode_at(mut self, n: usize) -> Self {
        self.fail_decode_at = Some(n);
        self
    }

    /// Make every later `evict_range` fail, leaving positions live
    pub fn refuse_eviction(&mut self) {
        self.refuse_eviction = true;
    }

    pub fn set_prompt_len(&mut self, len: usize) {
        self.prompt_len = len;
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live positions are exactly `0..live_count()`
    pub fn is_contiguous(&self) -> bool {
        self.live.keys().copied().eq(0..self.live.len() as u32)
    }
}

impl InferenceContext for ScriptedContext {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn tokenize(
        &self,
        _text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError> {
        self.tokenize_calls
            .borrow_mut()
            .push((add_special, parse_special));

        let fail = if parse_special {
            self.fail_special
        } else {
            self.fail_plain
        };
        if fail {
            return Err(EngineError::Tokenization("scripted failure".into()));
        }
        Ok((0..self.prompt_len).map(|i| Token(100 + i as i32)).collect())
    }

    fn decode(&mut self, batch: &[BatchToken]) -> Result<(), EngineError> {
        let call = self.decode_calls;
        self.decode_calls += 1;

        if self.fail_decode_at == Some(call) {
            return Err(EngineError::Decode("scripted failure".into()));
        }
        if batch.is_empty() || batch.len() > self.batch_size {
            return Err(EngineError::Decode(format!("bad batch size {}", batch.len())));
        }

        for entry in batch {
            if entry.pos >= self.capacity {
                return Err(EngineError::Decode(format!("position {} out of range", entry.pos)));
            }
            if self.live.contains_key(&entry.pos) {
                return Err(EngineError::Decode(format!("position {} reused", entry.pos)));
            }
        }

        self.batch_sizes.push(batch.len());
        for entry in batch {
            self.live.insert(entry.pos, entry.token);
            self.highest_pos = self.highest_pos.max(Some(entry.pos));
            if entry.logits {
                self.logits_requests.push(entry.pos);
            }
        }
        Ok(())
    }

    fn sample(&mut self) -> Token {
        self.sample_calls += 1;
        self.replies.pop_front().unwrap_or(FILLER)
    }

    fn token_to_bytes(&self, token: Token) -> Result<Vec<u8>, EngineError> {
        Ok(self
            .pieces
            .get(&token.0)
            .cloned()
            .unwrap_or_else(|| b"x".to_vec()))
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOG
    }

    fn evict_range(&mut self, from: u32, to: u32) -> Result<(), EngineError> {
        if self.refuse_eviction {
            return Err(EngineError::Memory("partial sequence removal refused".into()));
        }
        self.live.retain(|pos, _| *pos < from || *pos >= to);
        Ok(())
    }

    fn shift_positions(&mut self, from: u32, delta: i32) -> Result<(), EngineError> {
        let mut shifted = BTreeMap::new();
        for (pos, token) in std::mem::take(&mut self.live) {
            let new_pos = if pos >= from {
                i64::from(pos) + i64::from(delta)
            } else {
                i64::from(pos)
            };
            if new_pos < 0 || shifted.insert(new_pos as u32, token).is_some() {
                return Err(EngineError::Memory(format!("shift collides at {}", new_pos)));
            }
        }
        self.live = shifted;
        Ok(())
    }

    fn clear(&mut self) {
        self.live.clear();
    }
}
