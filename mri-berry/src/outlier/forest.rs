//! isolation forest 异常分数.
//!
//! 标准公式: 样本 x 的分数为 `2 ^ (-E[h(x)] / c(psi))`, 其中 `h` 是随机
//! 划分树上的路径长度, `c` 是二叉搜索树平均失败查找路径长度, `psi`
//! 是子采样规模. 分数越接近 1 越异常.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 树的棵数.
const NUM_TREES: usize = 100;

/// 每棵树的最大子采样规模.
const MAX_SUBSAMPLE: usize = 256;

/// 欧拉-马歇罗尼常数. 用于调和数近似.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

enum Node {
    Internal {
        feature: usize,
        split: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// n 个样本的平均失败查找路径长度 c(n).
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let m = (n - 1) as f64;
            2.0 * (m.ln() + EULER_GAMMA) - 2.0 * m / n as f64
        }
    }
}

fn build(data: &Array2<f64>, sample: &mut [usize], depth: u32, limit: u32, rng: &mut StdRng) -> Node {
    if depth >= limit || sample.len() <= 1 {
        return Node::Leaf { size: sample.len() };
    }

    let feature = rng.gen_range(0..data.ncols());
    let (mut lo, mut hi) = (f64::MAX, f64::MIN);
    for &row in sample.iter() {
        let v = data[(row, feature)];
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if lo >= hi {
        // 该特征在子采样内退化, 无法继续划分.
        return Node::Leaf { size: sample.len() };
    }

    let split = lo + rng.gen::<f64>() * (hi - lo);
    let mid = itertools::partition(sample.iter_mut(), |&row| data[(row, feature)] < split);
    let (left_rows, right_rows) = sample.split_at_mut(mid);
    if left_rows.is_empty() || right_rows.is_empty() {
        return Node::Leaf {
            size: left_rows.len() + right_rows.len(),
        };
    }

    Node::Internal {
        feature,
        split,
        left: Box::new(build(data, left_rows, depth + 1, limit, rng)),
        right: Box::new(build(data, right_rows, depth + 1, limit, rng)),
    }
}

/// 样本 `row` 在一棵树上的路径长度 (叶子规模按 c 修正).
fn path_length(data: &Array2<f64>, row: usize, mut node: &Node) -> f64 {
    let mut depth = 0.0;
    loop {
        match node {
            Node::Leaf { size } => return depth + average_path_length(*size),
            Node::Internal {
                feature,
                split,
                left,
                right,
            } => {
                node = if data[(row, *feature)] < *split {
                    left
                } else {
                    right
                };
                depth += 1.0;
            }
        }
    }
}

/// 计算 (受试者 × 特征) 矩阵每行的异常分数. 分数越大越异常.
///
/// 给定相同的 `seed`, 结果逐位一致.
pub(crate) fn anomaly_scores(data: &Array2<f64>, seed: u64) -> Vec<f64> {
    let n = data.nrows();
    let psi = n.min(MAX_SUBSAMPLE);
    let limit = (psi as f64).log2().ceil().max(1.0) as u32;

    let mut master = StdRng::seed_from_u64(seed);
    let seeds: Vec<u64> = (0..NUM_TREES).map(|_| master.gen()).collect();

    let build_one = |&tree_seed: &u64| {
        let mut rng = StdRng::seed_from_u64(tree_seed);
        let mut sample = rand::seq::index::sample(&mut rng, n, psi).into_vec();
        build(data, &mut sample, 0, limit, &mut rng)
    };

    #[cfg(feature = "rayon")]
    let trees: Vec<Node> = {
        use rayon::prelude::*;
        seeds.par_iter().map(build_one).collect()
    };
    #[cfg(not(feature = "rayon"))]
    let trees: Vec<Node> = seeds.iter().map(build_one).collect();

    let c = average_path_length(psi).max(f64::MIN_POSITIVE);
    (0..n)
        .map(|row| {
            let mean_path = trees
                .iter()
                .map(|t| path_length(data, row, t))
                .sum::<f64>()
                / NUM_TREES as f64;
            2f64.powf(-mean_path / c)
        })
        .collect()
}
