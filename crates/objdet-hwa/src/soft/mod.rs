//! 软件后端
//!
//! [`SoftHwa`] 在 `trigger` 内同步执行已装载的参数集，[`SoftEdma`] 用内存拷贝
//! 实现二维传输和通道链接。两者的边界检查与真实硬件的约束一致：
//! 每次访问都必须落在描述符给出的区内。

pub mod cfar;
pub mod codec;
pub mod fft;

use crate::mem::{MemRegion, MemoryMap};
use crate::paramset::{
    CfarParams, DecompressParams, DopplerFftParams, HwaStatus, ParamSet, RangeFftParams,
};
use crate::transfer::TransferRequest;
use crate::{Accelerator, HwaError, TransferEngine};
use cfar::CfarKernel;
use codec::BlockCodec;
use fft::{FftBank, log2_q11, magnitude, quantize, windowed};
use num_complex::Complex32;
use objdet_protocol::Cmplx16;
use tracing::trace;

/// 默认参数集槽位数
pub const DEFAULT_PARAM_SETS: usize = 32;

/// 默认传输通道数
pub const DEFAULT_CHANNELS: usize = 64;

/// 软件加速器
#[derive(Debug)]
pub struct SoftHwa {
    slots: Vec<Option<ParamSet>>,
    armed: Option<(usize, usize)>,
    completed: Option<HwaStatus>,
    fft: FftBank,
}

impl Default for SoftHwa {
    fn default() -> Self {
        Self::new(DEFAULT_PARAM_SETS)
    }
}

impl SoftHwa {
    pub fn new(num_param_sets: usize) -> Self {
        Self {
            slots: vec![None; num_param_sets],
            armed: None,
            completed: None,
            fft: FftBank::new(),
        }
    }

    fn run_range_fft(fft: &mut FftBank, p: &RangeFftParams, mem: &mut MemoryMap) -> Result<(), HwaError> {
        let n_adc = p.num_adc_samples as usize;
        let n_fft = p.fft_size as usize;
        let (rx, tx) = (p.num_rx as usize, p.num_tx as usize);
        let chirps = p.num_doppler_chirps as usize;
        let ant = rx * tx;
        if n_adc > n_fft || ant == 0 {
            return Err(HwaError::InvalidParamSet("range fft geometry"));
        }

        let mut window = vec![0u16; n_adc];
        mem.read_u16_slice(p.window, &mut window)?;

        let codec = match p.compressed_block_bytes {
            Some(bytes) => Some(BlockCodec::new(ant, bytes as usize)?),
            None => None,
        };
        let block_bytes = codec.map_or(ant * Cmplx16::SIZE, |c| c.block_bytes());
        p.cube.sub(0, n_fft * chirps * block_bytes)?;

        let mut samples = vec![Cmplx16::ZERO; n_adc];
        let mut buf = vec![Complex32::new(0.0, 0.0); n_fft];
        // [bin][ant]，一个多普勒 chirp 的全部输出
        let mut blocks = vec![Cmplx16::ZERO; n_fft * ant];
        let mut packed = vec![0u8; block_bytes];

        for k in 0..chirps {
            for t in 0..tx {
                let chirp = k * tx + t;
                for r in 0..rx {
                    let src = p
                        .adc
                        .sub((chirp * rx + r) * n_adc * Cmplx16::SIZE, n_adc * Cmplx16::SIZE)?;
                    mem.read_cmplx16_slice(src, &mut samples)?;
                    for (dst, (&s, &w)) in buf.iter_mut().zip(samples.iter().zip(&window)) {
                        *dst = windowed(s, w);
                    }
                    buf[n_adc..].fill(Complex32::new(0.0, 0.0));
                    fft.forward(&mut buf);
                    let v = t * rx + r;
                    for (bin, x) in buf.iter().enumerate() {
                        blocks[bin * ant + v] = quantize(*x, p.scale_shift);
                    }
                }
            }
            for bin in 0..n_fft {
                let block = &blocks[bin * ant..(bin + 1) * ant];
                let dst = p.cube.sub((bin * chirps + k) * block_bytes, block_bytes)?;
                match &codec {
                    Some(codec) => {
                        codec.encode(block, &mut packed);
                        mem.bytes_mut(dst)?.copy_from_slice(&packed);
                    }
                    None => mem.write_cmplx16_slice(dst, block)?,
                }
            }
        }
        Ok(())
    }

    fn run_decompress(p: &DecompressParams, mem: &mut MemoryMap) -> Result<(), HwaError> {
        let ant = p.num_ant as usize;
        let codec = BlockCodec::new(ant, p.block_bytes as usize)?;
        let mut block = vec![Cmplx16::ZERO; ant];
        for b in 0..p.num_blocks as usize {
            let src = p.src.sub(b * codec.block_bytes(), codec.block_bytes())?;
            codec.decode(mem.bytes(src)?, &mut block);
            let dst = p.dst.sub(b * ant * Cmplx16::SIZE, ant * Cmplx16::SIZE)?;
            mem.write_cmplx16_slice(dst, &block)?;
        }
        Ok(())
    }

    fn run_doppler_fft(fft: &mut FftBank, p: &DopplerFftParams, mem: &mut MemoryMap) -> Result<(), HwaError> {
        let chirps = p.num_chirps as usize;
        let n_fft = p.fft_size as usize;
        let ant = p.num_ant as usize;
        if chirps > n_fft || ant == 0 {
            return Err(HwaError::InvalidParamSet("doppler fft geometry"));
        }

        let mut window = vec![0u16; chirps];
        mem.read_u16_slice(p.window, &mut window)?;
        let mut input = vec![Cmplx16::ZERO; chirps * ant];
        mem.read_cmplx16_slice(p.input, &mut input)?;

        let mut output = vec![Cmplx16::ZERO; n_fft * ant];
        let mut buf = vec![Complex32::new(0.0, 0.0); n_fft];
        for a in 0..ant {
            for c in 0..chirps {
                buf[c] = windowed(input[c * ant + a], window[c]);
            }
            buf[chirps..].fill(Complex32::new(0.0, 0.0));
            fft.forward(&mut buf);
            for (d, x) in buf.iter().enumerate() {
                output[d * ant + a] = quantize(*x, p.scale_shift);
            }
        }

        let det: Vec<u16> = output
            .chunks_exact(ant)
            .map(|bin| log2_q11(bin.iter().map(|s| magnitude(*s)).sum()))
            .collect();
        mem.write_cmplx16_slice(p.output, &output)?;
        mem.write_u16_slice(p.det_row, &det)?;
        Ok(())
    }

    fn run_cfar(p: &CfarParams, mem: &mut MemoryMap) -> Result<usize, HwaError> {
        let mut cells = vec![0u16; p.num_cells as usize];
        mem.read_u16_slice(p.input, &mut cells)?;
        let kernel = CfarKernel {
            averaging: p.averaging,
            win_len: p.win_len as usize,
            guard_len: p.guard_len as usize,
            threshold: p.threshold,
            cyclic: p.cyclic,
        };
        let hits = kernel.detect(&cells, p.max_hits());
        let packed: Vec<u16> = hits.iter().flat_map(|h| [h.cell, h.noise]).collect();
        mem.write_u16_slice(p.output, &packed)?;
        Ok(hits.len())
    }
}

impl Accelerator for SoftHwa {
    fn num_param_sets(&self) -> usize {
        self.slots.len()
    }

    fn set_param_set(&mut self, index: usize, ps: ParamSet) -> Result<(), HwaError> {
        let max = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(HwaError::ParamSetOutOfRange { index, max })?;
        *slot = Some(ps);
        Ok(())
    }

    fn param_set(&self, index: usize) -> Option<&ParamSet> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn arm(&mut self, first: usize, count: usize) -> Result<(), HwaError> {
        let max = self.slots.len();
        let last = first + count;
        if count == 0 || last > max {
            return Err(HwaError::ParamSetOutOfRange { index: last, max });
        }
        if let Some(empty) = (first..last).find(|&i| self.slots[i].is_none()) {
            return Err(HwaError::EmptyParamSet(empty));
        }
        self.armed = Some((first, count));
        self.completed = None;
        Ok(())
    }

    fn armed(&self) -> Option<(usize, usize)> {
        self.armed
    }

    fn trigger(&mut self, mem: &mut MemoryMap) -> Result<(), HwaError> {
        let (first, count) = self.armed.take().ok_or(HwaError::NotArmed)?;
        let mut status = HwaStatus::default();
        for index in first..first + count {
            let ps = self.slots[index]
                .as_ref()
                .ok_or(HwaError::EmptyParamSet(index))?;
            trace!("hwa: run param set {} ({})", index, ps.name());
            match ps {
                ParamSet::RangeFft(p) => Self::run_range_fft(&mut self.fft, p, mem)?,
                ParamSet::Decompress(p) => Self::run_decompress(p, mem)?,
                ParamSet::DopplerFft(p) => Self::run_doppler_fft(&mut self.fft, p, mem)?,
                ParamSet::Cfar(p) => status.cfar_hits += Self::run_cfar(p, mem)?,
            }
            status.param_sets_run += 1;
        }
        self.completed = Some(status);
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.completed.is_some()
    }

    fn wait_done(&mut self) -> Result<HwaStatus, HwaError> {
        self.completed.take().ok_or(HwaError::NotTriggered)
    }
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    req: TransferRequest,
    done: bool,
}

/// 软件传输引擎
#[derive(Debug)]
pub struct SoftEdma {
    channels: Vec<Option<Channel>>,
    bytes_moved: u64,
}

impl Default for SoftEdma {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS)
    }
}

impl SoftEdma {
    pub fn new(num_channels: usize) -> Self {
        Self {
            channels: vec![None; num_channels],
            bytes_moved: 0,
        }
    }

    /// 累计搬运字节数
    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    fn channel_mut(&mut self, ch: u8) -> Result<&mut Channel, HwaError> {
        let max = self.channels.len();
        self.channels
            .get_mut(ch as usize)
            .ok_or(HwaError::ChannelOutOfRange { channel: ch, max })?
            .as_mut()
            .ok_or(HwaError::ChannelNotConfigured(ch))
    }

    fn execute(req: &TransferRequest, mem: &mut MemoryMap) -> Result<usize, HwaError> {
        let shape = req.shape;
        // 整体范围先检查，避免部分写入
        req.src.sub(0, shape.src_extent())?;
        req.dst.sub(0, shape.dst_extent())?;
        let acnt = shape.acnt as usize;
        for row in 0..shape.bcnt as usize {
            let src = req.src.sub(row * shape.src_bidx as usize, acnt)?;
            let dst = req.dst.sub(row * shape.dst_bidx as usize, acnt)?;
            mem.copy_region(src, dst)?;
        }
        Ok(shape.total_bytes())
    }
}

impl TransferEngine for SoftEdma {
    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn configure(&mut self, ch: u8, req: TransferRequest) -> Result<(), HwaError> {
        let max = self.channels.len();
        if let Some(next) = req.chain_to
            && next as usize >= max
        {
            return Err(HwaError::ChannelOutOfRange { channel: next, max });
        }
        let slot = self
            .channels
            .get_mut(ch as usize)
            .ok_or(HwaError::ChannelOutOfRange { channel: ch, max })?;
        *slot = Some(Channel { req, done: false });
        Ok(())
    }

    fn retarget(&mut self, ch: u8, src: MemRegion, dst: MemRegion) -> Result<(), HwaError> {
        let channel = self.channel_mut(ch)?;
        channel.req.src = src;
        channel.req.dst = dst;
        channel.done = false;
        Ok(())
    }

    fn start(&mut self, ch: u8, mem: &mut MemoryMap) -> Result<(), HwaError> {
        let mut current = Some(ch);
        let mut hops = 0usize;
        while let Some(c) = current {
            if hops > self.channels.len() {
                return Err(HwaError::ChainLoop(c));
            }
            let req = self.channel_mut(c)?.req;
            let moved = Self::execute(&req, mem)?;
            self.bytes_moved += moved as u64;
            self.channel_mut(c)?.done = true;
            trace!("edma: channel {} moved {} bytes", c, moved);
            current = req.chain_to;
            hops += 1;
        }
        Ok(())
    }

    fn is_done(&self, ch: u8) -> bool {
        matches!(self.channels.get(ch as usize), Some(Some(c)) if c.done)
    }

    fn wait(&mut self, ch: u8) -> Result<(), HwaError> {
        let channel = self.channel_mut(ch)?;
        if !channel.done {
            return Err(HwaError::TransferNotStarted(ch));
        }
        channel.done = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Bank;
    use crate::paramset::fft_scale_shift;
    use crate::transfer::TransferShape;
    use objdet_protocol::CfarAveraging;

    fn mem() -> MemoryMap {
        MemoryMap::new(4096, 1024, 4096, 16384)
    }

    #[test]
    fn test_trigger_requires_arm() {
        let mut hwa = SoftHwa::default();
        let mut mem = mem();
        assert_eq!(hwa.trigger(&mut mem), Err(HwaError::NotArmed));
        assert_eq!(hwa.wait_done(), Err(HwaError::NotTriggered));
        assert_eq!(hwa.arm(0, 1), Err(HwaError::EmptyParamSet(0)));
        assert!(matches!(
            hwa.set_param_set(99, ParamSet::Cfar(cfar_params(&mut mem))),
            Err(HwaError::ParamSetOutOfRange { index: 99, .. })
        ));
    }

    fn cfar_params(mem: &mut MemoryMap) -> CfarParams {
        let local = mem.pool_mut(Bank::Local).unwrap();
        let input = local.alloc(32, 4).unwrap();
        let output = local.alloc(16, 4).unwrap();
        CfarParams {
            input,
            output,
            num_cells: 16,
            averaging: CfarAveraging::Ca,
            win_len: 2,
            guard_len: 1,
            threshold: 100,
            cyclic: true,
        }
    }

    #[test]
    fn test_cfar_param_set() {
        let mut mem = mem();
        let p = cfar_params(&mut mem);
        let mut cells = [5u16; 16];
        cells[9] = 900;
        mem.write_u16_slice(p.input, &cells).unwrap();

        let mut hwa = SoftHwa::default();
        hwa.set_param_set(3, ParamSet::Cfar(p.clone())).unwrap();
        hwa.arm(3, 1).unwrap();
        hwa.trigger(&mut mem).unwrap();
        assert!(hwa.is_done());
        let status = hwa.wait_done().unwrap();
        assert_eq!(status.cfar_hits, 1);
        assert_eq!(mem.read_u16(p.output, 0).unwrap(), 9);
        assert_eq!(mem.read_u16(p.output, 1).unwrap(), 5);
    }

    #[test]
    fn test_doppler_fft_tone() {
        let mut mem = mem();
        let chirps = 16usize;
        let ant = 2usize;
        let local = mem.pool_mut(Bank::Local).unwrap();
        let input = local.alloc(chirps * ant * 4, 4).unwrap();
        let output = local.alloc(chirps * ant * 4, 4).unwrap();
        let det_row = local.alloc(chirps * 2, 4).unwrap();
        let window = mem.pool_mut(Bank::Window).unwrap().alloc(chirps * 2, 4).unwrap();
        mem.write_u16_slice(window, &vec![32767u16; chirps]).unwrap();

        // 多普勒单元 3 的单音
        let samples: Vec<Cmplx16> = (0..chirps)
            .flat_map(|c| {
                let phase = 2.0 * std::f32::consts::PI * 3.0 * c as f32 / chirps as f32;
                let s = Cmplx16::from_f32(1000.0 * phase.cos(), 1000.0 * phase.sin());
                [s, s]
            })
            .collect();
        mem.write_cmplx16_slice(input, &samples).unwrap();

        let mut hwa = SoftHwa::default();
        hwa.set_param_set(
            0,
            ParamSet::DopplerFft(DopplerFftParams {
                input,
                window,
                output,
                det_row,
                num_chirps: chirps as u16,
                fft_size: chirps as u16,
                num_ant: ant as u8,
                scale_shift: fft_scale_shift(chirps),
            }),
        )
        .unwrap();
        hwa.arm(0, 1).unwrap();
        hwa.trigger(&mut mem).unwrap();
        hwa.wait_done().unwrap();

        let mut det = vec![0u16; chirps];
        mem.read_u16_slice(det_row, &mut det).unwrap();
        let peak = (0..chirps).max_by_key(|&d| det[d]).unwrap();
        assert_eq!(peak, 3);
        // 16000 / 4 = 4000 每天线，两天线和 8000
        let bin = mem.read_cmplx16(output, 3 * ant).unwrap();
        assert!((magnitude(bin) - 4000.0).abs() < 4.0);
    }

    #[test]
    fn test_edma_strided_column() {
        let mut mem = mem();
        let matrix = mem.pool_mut(Bank::Slow).unwrap().alloc(8 * 4 * 2, 4).unwrap();
        let column = mem.pool_mut(Bank::Local).unwrap().alloc(8 * 2, 4).unwrap();
        let values: Vec<u16> = (0..32).collect();
        mem.write_u16_slice(matrix, &values).unwrap();

        let mut edma = SoftEdma::default();
        let shape = TransferShape::strided(2, 8, 8, 2).unwrap();
        let col1 = matrix.sub(2, matrix.len() - 2).unwrap();
        edma.configure(5, TransferRequest::new(col1, column, shape)).unwrap();
        edma.start(5, &mut mem).unwrap();
        edma.wait(5).unwrap();
        let mut out = [0u16; 8];
        mem.read_u16_slice(column, &mut out).unwrap();
        assert_eq!(out, [1, 5, 9, 13, 17, 21, 25, 29]);
        assert_eq!(edma.wait(5), Err(HwaError::TransferNotStarted(5)));
    }

    #[test]
    fn test_edma_chain_and_bounds() {
        let mut mem = mem();
        let slow = mem.pool_mut(Bank::Slow).unwrap();
        let a = slow.alloc(16, 4).unwrap();
        let b = slow.alloc(16, 4).unwrap();
        let c = slow.alloc(16, 4).unwrap();
        mem.fill(a, 7).unwrap();

        let mut edma = SoftEdma::default();
        let shape = TransferShape::contiguous(16).unwrap();
        edma.configure(0, TransferRequest::new(a, b, shape).chain(1)).unwrap();
        edma.configure(1, TransferRequest::new(b, c, shape)).unwrap();
        edma.start(0, &mut mem).unwrap();
        assert!(edma.is_done(0) && edma.is_done(1));
        assert_eq!(mem.bytes(c).unwrap(), &[7u8; 16]);

        let too_long = TransferShape::contiguous(32).unwrap();
        edma.configure(2, TransferRequest::new(a, b, too_long)).unwrap();
        assert!(matches!(
            edma.start(2, &mut mem),
            Err(HwaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_edma_chain_loop_detected() {
        let mut mem = mem();
        let slow = mem.pool_mut(Bank::Slow).unwrap();
        let a = slow.alloc(4, 4).unwrap();
        let b = slow.alloc(4, 4).unwrap();
        let mut edma = SoftEdma::new(2);
        let shape = TransferShape::contiguous(4).unwrap();
        edma.configure(0, TransferRequest::new(a, b, shape).chain(1)).unwrap();
        edma.configure(1, TransferRequest::new(b, a, shape).chain(0)).unwrap();
        assert!(matches!(edma.start(0, &mut mem), Err(HwaError::ChainLoop(_))));
    }
}
