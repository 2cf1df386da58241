//! 对数域 CFAR 检测核
//!
//! 对每个待检单元（CUT），在两侧各跳过 `guard` 个保护单元后取 `win` 个单元求平均，
//! 检测条件为 `cut > noise + threshold`。

use objdet_protocol::CfarAveraging;

/// CFAR 检测参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfarKernel {
    pub averaging: CfarAveraging,
    pub win_len: usize,
    pub guard_len: usize,
    pub threshold: u16,
    pub cyclic: bool,
}

/// 一个检测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfarHit {
    pub cell: u16,
    pub noise: u16,
}

impl CfarKernel {
    /// 单元 `i` 的噪声估计；两侧窗口都越界时返回 `None`
    pub fn noise_at(&self, cells: &[u16], i: usize) -> Option<u16> {
        let n = cells.len();
        let reach = self.guard_len + self.win_len;
        if self.win_len == 0 || n == 0 {
            return None;
        }
        let side_sum = |start: isize| -> u32 {
            (0..self.win_len as isize)
                .map(|j| cells[(start + j).rem_euclid(n as isize) as usize] as u32)
                .sum()
        };
        let left_start = i as isize - reach as isize;
        let right_start = (i + self.guard_len + 1) as isize;

        let (left, right) = if self.cyclic {
            (Some(side_sum(left_start)), Some(side_sum(right_start)))
        } else {
            let left = (left_start >= 0).then(|| side_sum(left_start));
            let right = (i + reach < n).then(|| side_sum(right_start));
            (left, right)
        };

        let win = self.win_len as u32;
        let noise = match (left, right) {
            (Some(l), Some(r)) => match self.averaging {
                CfarAveraging::Ca => (l + r) / (2 * win),
                CfarAveraging::Cago => l.max(r) / win,
                CfarAveraging::Caso => l.min(r) / win,
            },
            (Some(s), None) | (None, Some(s)) => s / win,
            (None, None) => return None,
        };
        Some(noise as u16)
    }

    /// 检测所有单元，最多输出 `max_hits` 个结果
    pub fn detect(&self, cells: &[u16], max_hits: usize) -> Vec<CfarHit> {
        let mut hits = Vec::new();
        for (i, &cut) in cells.iter().enumerate() {
            if hits.len() >= max_hits {
                break;
            }
            let Some(noise) = self.noise_at(cells, i) else {
                continue;
            };
            if cut as u32 > noise as u32 + self.threshold as u32 {
                hits.push(CfarHit {
                    cell: i as u16,
                    noise,
                });
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(averaging: CfarAveraging, cyclic: bool) -> CfarKernel {
        CfarKernel {
            averaging,
            win_len: 2,
            guard_len: 1,
            threshold: 100,
            cyclic,
        }
    }

    #[test]
    fn test_single_peak() {
        let mut cells = vec![10u16; 16];
        cells[7] = 500;
        let hits = kernel(CfarAveraging::Ca, false).detect(&cells, 16);
        assert_eq!(hits, vec![CfarHit { cell: 7, noise: 10 }]);
    }

    #[test]
    fn test_cyclic_edge() {
        let mut cells = vec![10u16; 16];
        cells[0] = 500;
        let hits = kernel(CfarAveraging::Ca, true).detect(&cells, 16);
        assert_eq!(hits, vec![CfarHit { cell: 0, noise: 10 }]);
        // 非循环：左侧越界时只用右侧
        let hits = kernel(CfarAveraging::Ca, false).detect(&cells, 16);
        assert_eq!(hits, vec![CfarHit { cell: 0, noise: 10 }]);
    }

    #[test]
    fn test_go_so() {
        // 左侧噪声 20，右侧噪声 200
        let cells = [20, 20, 0, 400, 0, 200, 200];
        let go = kernel(CfarAveraging::Cago, false);
        let so = kernel(CfarAveraging::Caso, false);
        assert_eq!(go.noise_at(&cells, 3), Some(200));
        assert_eq!(so.noise_at(&cells, 3), Some(20));
        assert!(go.detect(&cells, 8).iter().any(|h| h.cell == 3));
        assert_eq!(so.detect(&cells, 8)[0], CfarHit { cell: 3, noise: 20 });
    }

    #[test]
    fn test_max_hits() {
        let mut cells = vec![0u16; 32];
        for i in (4..28).step_by(6) {
            cells[i] = 1000;
        }
        let hits = kernel(CfarAveraging::Ca, false).detect(&cells, 2);
        assert_eq!(hits.len(), 2);
    }
}
