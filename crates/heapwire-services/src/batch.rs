//! Statistics batching — turns sampling ticks into AUTO_STAT packets.
//!
//! A sample is taken every `gather_freq` (or every tick when that is 0)
//! and appended to the open batch. A batch closes when it holds
//! `max_items` samples or when `send_freq` has passed since its window
//! opened, whichever comes first. A window opens when the previous batch
//! closes, or at the first sample after a reset.
//!
//! Backpressure is lossy: while the outbound queue is deeper than
//! `max_queue_depth`, ticks are skipped entirely and their samples are
//! never taken.

use std::time::{Duration, Instant};

use heapwire_core::config::StatsConfig;
use heapwire_core::wire::{HEADER_LEN, MAX_FRAME_LEN};
use heapwire_core::{MessageType, Packet, PacketPool, Status};

use crate::producer::StatsProducer;

/// Fixed batching parameters, derived once from config and sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub gather_freq: Duration,
    pub send_freq: Duration,
    pub sample_size: usize,
    pub max_items: u16,
    pub max_queue_depth: usize,
    pub pool_capacity: usize,
}

impl BatchSettings {
    pub fn new(stats: &StatsConfig, sample_size: u32) -> Self {
        Self {
            gather_freq: Duration::from_millis(u64::from(stats.gather_freq_ms)),
            send_freq: Duration::from_millis(u64::from(stats.send_freq_ms)),
            sample_size: sample_size as usize,
            max_items: max_items_per_packet(
                stats.gather_freq_ms,
                stats.send_freq_ms,
                stats.max_packet_bytes,
                sample_size,
            ),
            max_queue_depth: stats.max_queue_depth,
            pool_capacity: stats.pool_capacity,
        }
    }

    /// Payload bytes of a full batch.
    pub fn batch_bytes(&self) -> usize {
        usize::from(self.max_items) * self.sample_size
    }
}

/// `min(send/gather + 1, max_packet_bytes / sample_size)`, at least 1.
///
/// A zero gather period drops the time bound; the packet bound is capped
/// at what one frame can carry.
pub fn max_items_per_packet(
    gather_freq_ms: u32,
    send_freq_ms: u32,
    max_packet_bytes: u32,
    sample_size: u32,
) -> u16 {
    let frame_room = (MAX_FRAME_LEN - HEADER_LEN) as u32;
    let by_size = match sample_size {
        0 => u32::MAX,
        n => max_packet_bytes.min(frame_room) / n,
    };
    let by_time = match gather_freq_ms {
        0 => u32::MAX,
        g => (send_freq_ms / g).saturating_add(1),
    };
    by_size.min(by_time).clamp(1, u32::from(u16::MAX)) as u16
}

#[derive(Debug)]
pub struct StatBatcher {
    settings: BatchSettings,
    pool: PacketPool,
    current: Option<Packet>,
    items: u16,
    window_start: Option<Instant>,
    last_gather: Option<Instant>,
}

impl StatBatcher {
    pub fn new(settings: BatchSettings) -> Self {
        Self {
            pool: PacketPool::new(settings.pool_capacity, settings.batch_bytes()),
            settings,
            current: None,
            items: 0,
            window_start: None,
            last_gather: None,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Run one tick. Closed batches are handed to `emit` in order.
    pub fn tick(
        &mut self,
        now: Instant,
        timestamp_ms: u32,
        queue_depth: usize,
        producer: &mut dyn StatsProducer,
        token: u32,
        mut emit: impl FnMut(Packet),
    ) {
        if queue_depth > self.settings.max_queue_depth {
            tracing::trace!(queue_depth, "outbound queue full, sampling skipped");
            return;
        }

        // A sample that completes the batch goes into it, not the next one.
        let gather = self.gather_due(now);
        let completes = gather && self.items + 1 >= self.settings.max_items;
        if self.items > 0 && !completes && self.window_elapsed(now) {
            self.close(now, token, &mut emit);
        }

        if !gather {
            return;
        }
        self.last_gather = Some(now);

        if self.current.is_none() {
            self.current = Some(self.pool.acquire());
            self.items = 0;
            if self.window_start.is_none() || self.window_elapsed(now) {
                self.window_start = Some(now);
            }
        }

        let size = self.settings.sample_size;
        let offset = usize::from(self.items) * size;
        if let Some(packet) = self.current.as_mut() {
            producer.write_sample(&mut packet.payload_mut()[offset..offset + size], timestamp_ms);
        }
        self.items += 1;

        if self.items >= self.settings.max_items {
            self.close(now, token, &mut emit);
        }
    }

    /// Give a delivered packet's buffer back. Transient packets are dropped.
    pub fn recycle(&mut self, packet: Packet) {
        self.pool.release(packet);
    }

    /// Forget the open batch and all timing. Used when a session ends or a
    /// new one starts.
    pub fn reset(&mut self) {
        if let Some(packet) = self.current.take() {
            self.pool.release(packet);
        }
        self.items = 0;
        self.window_start = None;
        self.last_gather = None;
    }

    /// Samples in the open batch.
    pub fn pending_items(&self) -> u16 {
        self.items
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    fn gather_due(&self, now: Instant) -> bool {
        match self.last_gather {
            None => true,
            Some(_) if self.settings.gather_freq.is_zero() => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.gather_freq,
        }
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        self.window_start
            .is_some_and(|start| now.saturating_duration_since(start) >= self.settings.send_freq)
    }

    fn close(&mut self, now: Instant, token: u32, emit: &mut impl FnMut(Packet)) {
        if let Some(mut packet) = self.current.take() {
            packet.truncate_payload(usize::from(self.items) * self.settings.sample_size);
            packet.fill_header(MessageType::AutoStat, Status::Success, self.items, token);
            tracing::trace!(items = self.items, len = packet.len(), "stat batch closed");
            emit(packet);
        }
        self.items = 0;
        self.window_start = Some(now);
    }
}
