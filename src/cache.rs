// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! A preallocated, block-chained byte-buffer cache keyed by `u64`.
//!
//! A single contiguous arena is carved into fixed-size blocks. Each live key
//! owns a singly-linked chain of blocks; everything else sits on one FIFO
//! free list. `Put` appends, `Get` consumes, `Peek` reads without consuming.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::error::CacheError;

const SENTINEL: u32 = u32::MAX;

/// Safety margin kept in reserve below which `Put` refuses to allocate.
pub const RESERVE_MARGIN: u32 = 10;

#[derive(Clone, Copy)]
struct BlockInfo {
    write_pos: u16,
    read_pos: u16,
    next_block: u32,
}

#[derive(Clone, Copy)]
struct Chain {
    first_block: u32,
    last_block: u32,
}

/// Construction-time sizing for a [`KvCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Hint for the key-map's initial capacity.
    pub max_frame_num: u32,
    pub block_num: u32,
    pub block_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_frame_num: 1024,
            block_num: 15000,
            block_size: 512,
        }
    }
}

/// A fixed-capacity, block-chained key/value byte cache.
pub struct KvCache {
    block_num: u32,
    block_size: u32,
    free_block_size: u32,
    free_head: u32,
    free_tail: u32,
    blocks: Vec<BlockInfo>,
    mem: Vec<u8>,
    chains: HashMap<u64, Chain>,
    _not_send: PhantomData<*const ()>,
}

impl KvCache {
    /// Preallocates `config.block_num` blocks of `config.block_size` bytes
    /// each. Fields are assigned from `config` before anything derives from
    /// them, so there is no use-before-assign ambiguity in how big the arena
    /// ends up being.
    pub fn new(config: CacheConfig) -> KvCache {
        let block_num = if config.block_num > 0 {
            config.block_num
        } else {
            CacheConfig::default().block_num
        };
        let block_size = if config.block_size > 0 {
            config.block_size
        } else {
            CacheConfig::default().block_size
        };

        let mut blocks = Vec::with_capacity(block_num as usize);
        for idx in 0..block_num {
            blocks.push(BlockInfo {
                write_pos: 0,
                read_pos: 0,
                next_block: if idx + 1 < block_num { idx + 1 } else { SENTINEL },
            });
        }

        KvCache {
            block_num,
            block_size,
            free_block_size: block_num,
            free_head: 0,
            free_tail: block_num.saturating_sub(1),
            blocks,
            mem: vec![0u8; block_num as usize * block_size as usize],
            chains: HashMap::with_capacity(config.max_frame_num as usize),
            _not_send: PhantomData,
        }
    }

    fn alloc_block(&mut self) -> u32 {
        debug_assert!(self.free_block_size > 0);
        let id = self.free_head;
        self.free_head = self.blocks[id as usize].next_block;
        self.free_block_size -= 1;
        let block = &mut self.blocks[id as usize];
        block.next_block = SENTINEL;
        block.write_pos = 0;
        block.read_pos = 0;
        id
    }

    fn free_chain(&mut self, first: u32, last: u32) {
        if self.free_block_size == 0 {
            self.free_head = first;
        } else {
            self.blocks[self.free_tail as usize].next_block = first;
        }
        self.free_tail = last;
        self.blocks[last as usize].next_block = SENTINEL;
    }

    fn block_slice_mut(&mut self, block_id: u32) -> &mut [u8] {
        let start = block_id as usize * self.block_size as usize;
        &mut self.mem[start..start + self.block_size as usize]
    }

    fn block_slice(&self, block_id: u32) -> &[u8] {
        let start = block_id as usize * self.block_size as usize;
        &self.mem[start..start + self.block_size as usize]
    }

    /// Appends `buf` to `key`'s chain. `overwrite` first deletes any
    /// existing chain for `key` so the result is as if only this call had
    /// ever been made. Fails, leaving the cache untouched, if fewer than
    /// `need + RESERVE_MARGIN` free blocks would remain.
    pub fn put(&mut self, key: u64, buf: &[u8], overwrite: bool) -> Result<(), CacheError> {
        let need = (buf.len() as u32 + self.block_size - 1) / self.block_size;
        if self.free_block_size <= need + RESERVE_MARGIN {
            return Err(CacheError::NotEnoughBlocks);
        }

        if overwrite {
            let _ = self.del(key);
        }

        let is_new = !self.chains.contains_key(&key);
        if is_new {
            let block_id = self.alloc_block();
            self.chains.insert(
                key,
                Chain {
                    first_block: block_id,
                    last_block: block_id,
                },
            );
        }

        let mut last_block = self.chains[&key].last_block;
        let mut written = 0usize;
        while written < buf.len() {
            let write_pos = self.blocks[last_block as usize].write_pos as usize;
            let room = self.block_size as usize - write_pos;
            let chunk = room.min(buf.len() - written);

            self.block_slice_mut(last_block)[write_pos..write_pos + chunk]
                .copy_from_slice(&buf[written..written + chunk]);
            self.blocks[last_block as usize].write_pos += chunk as u16;
            written += chunk;

            if written < buf.len() {
                let next = self.alloc_block();
                self.blocks[last_block as usize].next_block = next;
                last_block = next;
            }
        }
        self.chains.get_mut(&key).unwrap().last_block = last_block;

        Ok(())
    }

    /// Consumes up to `buf.len()` bytes from the head of `key`'s chain,
    /// returning emptied blocks to the free list and dropping the key once
    /// fully drained. Returns the number of bytes copied (0 if `key` is
    /// absent).
    pub fn get(&mut self, key: u64, buf: &mut [u8]) -> usize {
        let mut chain = match self.chains.get(&key) {
            Some(c) => *c,
            None => return 0,
        };

        let mut read = 0usize;
        let mut block_id = chain.first_block;
        while block_id != SENTINEL && read < buf.len() {
            let info = self.blocks[block_id as usize];
            let remain = (info.write_pos - info.read_pos) as usize;
            let chunk = (buf.len() - read).min(remain);

            let read_pos = info.read_pos as usize;
            buf[read..read + chunk]
                .copy_from_slice(&self.block_slice(block_id)[read_pos..read_pos + chunk]);
            self.blocks[block_id as usize].read_pos += chunk as u16;
            read += chunk;

            if chunk == remain {
                let next = self.blocks[block_id as usize].next_block;
                self.free_chain(block_id, block_id);
                self.free_block_size += 1;
                block_id = next;
            }
        }

        chain.first_block = block_id;
        if block_id == SENTINEL {
            self.chains.remove(&key);
        } else {
            self.chains.insert(key, chain);
        }
        read
    }

    /// Same as [`get`](Self::get) but does not consume: `read_pos` and the
    /// free list are left untouched.
    pub fn peek(&self, key: u64, buf: &mut [u8]) -> usize {
        let chain = match self.chains.get(&key) {
            Some(c) => *c,
            None => return 0,
        };

        let mut read = 0usize;
        let mut block_id = chain.first_block;
        while block_id != SENTINEL && read < buf.len() {
            let info = self.blocks[block_id as usize];
            let remain = (info.write_pos - info.read_pos) as usize;
            let chunk = (buf.len() - read).min(remain);

            let read_pos = info.read_pos as usize;
            buf[read..read + chunk]
                .copy_from_slice(&self.block_slice(block_id)[read_pos..read_pos + chunk]);
            read += chunk;

            if chunk == remain {
                block_id = info.next_block;
            }
        }
        read
    }

    /// Bytes currently readable for `key` (0 if absent).
    pub fn get_size(&self, key: u64) -> usize {
        let chain = match self.chains.get(&key) {
            Some(c) => *c,
            None => return 0,
        };

        let mut total = 0usize;
        let mut block_id = chain.first_block;
        while block_id != SENTINEL {
            let info = self.blocks[block_id as usize];
            total += (info.write_pos - info.read_pos) as usize;
            block_id = info.next_block;
        }
        total
    }

    /// Returns every block of `key`'s chain to the free list and forgets the
    /// key. Errors if `key` is absent.
    pub fn del(&mut self, key: u64) -> Result<(), CacheError> {
        let chain = self.chains.remove(&key).ok_or(CacheError::KeyNotFound)?;

        let mut count = 0u32;
        let mut block_id = chain.first_block;
        while block_id != SENTINEL {
            block_id = self.blocks[block_id as usize].next_block;
            count += 1;
        }

        self.free_chain(chain.first_block, chain.last_block);
        self.free_block_size += count;
        Ok(())
    }

    /// Total blocks configured at construction time.
    pub fn block_num(&self) -> u32 {
        self.block_num
    }

    /// Blocks currently on the free list (for the invariant
    /// `free + sum(chain lengths) == block_num`).
    pub fn free_block_count(&self) -> u32 {
        self.free_block_size
    }
}
