//! Scripted Host-CPU Port.
//!
//! The coupling point with the instruction-execution logic this simulator
//! excludes: a master that issues `Read(addr, width, meta)` and
//! `Write(addr, width, data, meta)` operations onto the fabric one at a
//! time and records each completion together with its metadata. A real
//! core would use the metadata to update its register file; scenarios and
//! tests use it to drive and observe the devices.

use std::collections::VecDeque;

use log::trace;

use crate::common::{AccessWidth, DeviceIndex, SimError, TransactionId};
use crate::soc::device::{DeviceContext, FabricDevice, LocalEvent};
use crate::soc::packet::{Packet, ReadBeat, ReadRequest, WriteBeat, WriteRequest};

/// One scripted operation.
#[derive(Clone, Copy, Debug)]
pub enum CpuOp {
    /// Load one granule and record the value.
    Read {
        addr: u32,
        width: AccessWidth,
        meta: u32,
    },
    /// Store one granule.
    Write {
        addr: u32,
        width: AccessWidth,
        data: u32,
        meta: u32,
    },
    /// Repeatedly load until the value equals `expect`.
    PollUntil { addr: u32, expect: u32, meta: u32 },
}

/// A recorded completion: the operation's metadata plus, for reads, the
/// fetched value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub meta: u32,
    pub value: Option<u32>,
}

/// Sequential master executing a scripted operation list.
///
/// At most one operation is outstanding; the next one issues only after
/// the current completion arrives.
pub struct HostCpu {
    index: DeviceIndex,
    name: String,
    poll_interval: u64,
    script: VecDeque<CpuOp>,
    current: Option<CpuOp>,
    outstanding: Option<TransactionId>,
    completions: Vec<Completion>,
}

impl HostCpu {
    /// Creates a host port with an empty script.
    ///
    /// # Arguments
    ///
    /// * `index` - This device's fabric index.
    /// * `poll_interval` - Ticks between unsuccessful poll reissues.
    pub fn new(index: DeviceIndex, poll_interval: u64) -> Self {
        Self {
            index,
            name: "HostCpu".to_string(),
            poll_interval,
            script: VecDeque::new(),
            current: None,
            outstanding: None,
            completions: Vec::new(),
        }
    }

    /// Appends one operation to the script.
    pub fn push_op(&mut self, op: CpuOp) {
        self.script.push_back(op);
    }

    /// Returns the recorded completions in retirement order.
    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    /// Returns `true` once the script has fully retired.
    pub fn is_idle(&self) -> bool {
        self.script.is_empty() && self.current.is_none() && self.outstanding.is_none()
    }

    /// Issues the current or next scripted operation.
    fn issue_next(&mut self, ctx: &mut DeviceContext) {
        if self.outstanding.is_some() {
            return;
        }
        let op = match self.current.or_else(|| self.script.pop_front()) {
            Some(op) => op,
            None => return,
        };
        self.current = Some(op);
        ctx.stats.host_ops += 1;

        match op {
            CpuOp::Read { addr, width, meta } => self.issue_read(ctx, addr, width, meta),
            CpuOp::PollUntil { addr, meta, .. } => {
                self.issue_read(ctx, addr, AccessWidth::Word, meta)
            }
            CpuOp::Write {
                addr, width, data, ..
            } => {
                let req = WriteRequest::single(
                    ctx.tids,
                    self.index,
                    "cpu",
                    WriteBeat { width, addr, data },
                );
                trace!("cpu: issue write {} at {:#010x}", req.tid, addr);
                self.outstanding = Some(req.tid);
                ctx.submit(Packet::WriteRequest(req));
            }
        }
    }

    /// Issues one single-beat load carrying `meta`.
    fn issue_read(&mut self, ctx: &mut DeviceContext, addr: u32, width: AccessWidth, meta: u32) {
        let req = ReadRequest::single(ctx.tids, self.index, "cpu", ReadBeat { width, addr, meta });
        trace!("cpu: issue read {} at {:#010x}", req.tid, addr);
        self.outstanding = Some(req.tid);
        ctx.submit(Packet::ReadRequest(req));
    }

    /// Retires the current operation and arms the next step.
    fn retire(&mut self, completion: Completion, ctx: &mut DeviceContext) {
        self.completions.push(completion);
        self.current = None;
        ctx.schedule(1, LocalEvent::CpuStep);
    }
}

impl FabricDevice for HostCpu {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_packet(&mut self, packet: Packet, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match packet {
            Packet::ReadResponse(resp) => {
                if self.outstanding != Some(resp.tid) {
                    return Err(SimError::UnknownTransaction {
                        device: self.index,
                        tid: resp.tid,
                    });
                }
                self.outstanding = None;
                let value = resp.beats[0].data;
                match self.current {
                    Some(CpuOp::PollUntil { expect, meta, .. }) => {
                        if value == expect {
                            self.retire(
                                Completion {
                                    meta,
                                    value: Some(value),
                                },
                                ctx,
                            );
                        } else {
                            ctx.schedule(self.poll_interval, LocalEvent::CpuStep);
                        }
                    }
                    Some(CpuOp::Read { meta, .. }) => {
                        self.retire(
                            Completion {
                                meta,
                                value: Some(value),
                            },
                            ctx,
                        );
                    }
                    _ => {
                        return Err(SimError::UnexpectedPacket {
                            device: self.index,
                            kind: "read response",
                        })
                    }
                }
                Ok(())
            }
            Packet::WriteResponse(resp) => {
                if self.outstanding != Some(resp.tid) {
                    return Err(SimError::UnknownTransaction {
                        device: self.index,
                        tid: resp.tid,
                    });
                }
                self.outstanding = None;
                match self.current {
                    Some(CpuOp::Write { meta, .. }) => {
                        self.retire(Completion { meta, value: None }, ctx);
                        Ok(())
                    }
                    _ => Err(SimError::UnexpectedPacket {
                        device: self.index,
                        kind: "write response",
                    }),
                }
            }
            other => Err(SimError::UnexpectedPacket {
                device: self.index,
                kind: other.kind(),
            }),
        }
    }

    fn handle_event(&mut self, event: LocalEvent, ctx: &mut DeviceContext) -> Result<(), SimError> {
        if event == LocalEvent::CpuStep {
            self.issue_next(ctx);
        }
        Ok(())
    }

    fn as_cpu_mut(&mut self) -> Option<&mut HostCpu> {
        Some(self)
    }
}
