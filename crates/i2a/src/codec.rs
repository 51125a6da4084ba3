//! Discretization codec.
//!
//! Maps palette-coloured observations and task rewards to dense categorical
//! indices and back. The environment model is trained against these indices
//! and predicts logits over them, so encoder and decoder must agree with the
//! model on both the palette order and the rounding convention.
//!
//! Rounding convention: each colour component is rounded half away from zero
//! (`f32::round`) before the palette lookup. This is the only convention the
//! codec implements.

use crate::config::TaskMode;
use crate::{ensure_shape, I2aError, Result};
use ndarray::{Array2, ArrayView2};
use tch::{Device, Kind, Tensor};

/// The seven MiniPacman colours, in category order.
pub const MINIPACMAN_PALETTE: [[f32; 3]; 7] = [
    [0.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [1.0, 1.0, 0.0],
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
];

/// Fixed, ordered table of RGB-like colours.
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    entries: Vec<[f32; 3]>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::minipacman()
    }
}

impl Palette {
    pub fn new(entries: Vec<[f32; 3]>) -> Self {
        Self { entries }
    }

    pub fn minipacman() -> Self {
        Self::new(MINIPACMAN_PALETTE.to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[[f32; 3]] {
        &self.entries
    }

    /// Category of a single pixel.
    pub fn encode_pixel(&self, pixel: [f32; 3]) -> Result<i64> {
        let rounded = pixel.map(f32::round);
        self.entries
            .iter()
            .position(|entry| *entry == rounded)
            .map(|index| index as i64)
            .ok_or(I2aError::UnknownPixel { pixel })
    }

    /// Encode a `[N, 3]` batch of pixels into `N` categories.
    pub fn encode_pixels(&self, pixels: ArrayView2<f32>) -> Result<Vec<i64>> {
        ensure_shape(
            "pixel batch",
            &[pixels.nrows() as i64, 3],
            &[pixels.nrows() as i64, pixels.ncols() as i64],
        )?;
        pixels
            .rows()
            .into_iter()
            .map(|row| self.encode_pixel([row[0], row[1], row[2]]))
            .collect()
    }

    /// Decode categories into a `[N, 3]` batch of palette colours.
    pub fn decode_categories(&self, categories: &[i64]) -> Result<Array2<f32>> {
        let mut pixels = Array2::zeros((categories.len(), 3));
        for (mut row, &category) in pixels.rows_mut().into_iter().zip(categories) {
            let entry = self.entry(category)?;
            row.assign(&ndarray::arr1(&entry));
        }
        Ok(pixels)
    }

    fn entry(&self, category: i64) -> Result<[f32; 3]> {
        usize::try_from(category)
            .ok()
            .and_then(|index| self.entries.get(index).copied())
            .ok_or(I2aError::UnknownCategory {
                index: category,
                num_categories: self.entries.len(),
            })
    }

    /// Encode a `[B, 3, H, W]` observation into `B*H*W` categories, ordered by
    /// batch element, then row, then column.
    pub fn observation_to_targets(&self, observations: &Tensor) -> Result<Tensor> {
        let size = observations.size();
        if size.len() != 4 || size[1] != 3 {
            return Err(I2aError::ShapeMismatch {
                context: "observation batch",
                expected: vec![-1, 3, -1, -1],
                actual: size,
            });
        }
        let flat = observations
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .permute([0, 2, 3, 1])
            .contiguous()
            .flatten(0, -1);
        let values = Vec::<f32>::try_from(flat)?;

        let targets = values
            .chunks_exact(3)
            .map(|pixel| self.encode_pixel([pixel[0], pixel[1], pixel[2]]))
            .collect::<Result<Vec<i64>>>()?;

        Ok(Tensor::from_slice(&targets).to_device(observations.device()))
    }

    /// Decode `N*H*W` categories (batch, row, column order) into a
    /// `[N, 3, H, W]` observation on the categories' device.
    pub fn targets_to_observation(
        &self,
        categories: &Tensor,
        height: i64,
        width: i64,
    ) -> Result<Tensor> {
        let numel = categories.numel() as i64;
        let cells = height * width;
        if cells == 0 || numel % cells != 0 {
            return Err(I2aError::ShapeMismatch {
                context: "category map",
                expected: vec![-1, height, width],
                actual: categories.size(),
            });
        }
        let categories = categories.flatten(0, -1).to_kind(Kind::Int64);
        self.check_range(&categories)?;

        let table: Vec<f32> = self.entries.iter().flatten().copied().collect();
        let table = Tensor::from_slice(&table)
            .reshape([self.entries.len() as i64, 3])
            .to_device(categories.device());

        Ok(table
            .index_select(0, &categories)
            .reshape([numel / cells, height, width, 3])
            .permute([0, 3, 1, 2])
            .contiguous())
    }

    fn check_range(&self, categories: &Tensor) -> Result<()> {
        if categories.numel() == 0 {
            return Ok(());
        }
        let min = categories.min().int64_value(&[]);
        let max = categories.max().int64_value(&[]);
        let num_categories = self.entries.len();
        if min < 0 {
            return Err(I2aError::UnknownCategory {
                index: min,
                num_categories,
            });
        }
        if max >= num_categories as i64 {
            return Err(I2aError::UnknownCategory {
                index: max,
                num_categories,
            });
        }
        Ok(())
    }
}

/// Reward categories of one task mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardTable {
    mode: TaskMode,
}

impl RewardTable {
    pub fn new(mode: TaskMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.mode.rewards().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mode.rewards().is_empty()
    }

    /// Category of each reward. Exact match only: reward sets are small and
    /// enumerable, so anything else is a mode mismatch.
    pub fn encode_rewards(&self, rewards: &[f32]) -> Result<Vec<i64>> {
        let table = self.mode.rewards();
        rewards
            .iter()
            .map(|&reward| {
                table
                    .iter()
                    .position(|&r| r == reward)
                    .map(|index| index as i64)
                    .ok_or_else(|| I2aError::UnknownReward {
                        mode: self.mode.to_string(),
                        reward,
                    })
            })
            .collect()
    }

    pub fn decode_rewards(&self, categories: &[i64]) -> Result<Vec<f32>> {
        let table = self.mode.rewards();
        categories
            .iter()
            .map(|&category| {
                usize::try_from(category)
                    .ok()
                    .and_then(|index| table.get(index).copied())
                    .ok_or_else(|| I2aError::UnknownRewardCategory {
                        mode: self.mode.to_string(),
                        index: category,
                    })
            })
            .collect()
    }

    /// Encode a `[N]` (or `[N, 1]`) reward tensor into `[N]` categories.
    pub fn rewards_to_targets(&self, rewards: &Tensor) -> Result<Tensor> {
        let values = Vec::<f32>::try_from(
            rewards
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .flatten(0, -1),
        )?;
        let targets = self.encode_rewards(&values)?;
        Ok(Tensor::from_slice(&targets).to_device(rewards.device()))
    }

    /// One-hot `[N, R]` float encoding of `[N]` reward categories.
    pub fn one_hot(&self, categories: &Tensor) -> Result<Tensor> {
        let num_rewards = self.len() as i64;
        if categories.numel() > 0 {
            let max = categories.max().int64_value(&[]);
            let min = categories.min().int64_value(&[]);
            if min < 0 || max >= num_rewards {
                return Err(I2aError::UnknownRewardCategory {
                    mode: self.mode.to_string(),
                    index: if min < 0 { min } else { max },
                });
            }
        }
        Ok(categories
            .to_kind(Kind::Int64)
            .one_hot(num_rewards)
            .to_kind(Kind::Float))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_palette_round_trip() {
        let palette = Palette::minipacman();
        for entry in palette.entries() {
            let pixels = Array2::from_shape_vec((1, 3), entry.to_vec()).unwrap();
            let categories = palette.encode_pixels(pixels.view()).unwrap();
            let decoded = palette.decode_categories(&categories).unwrap();
            assert_eq!(decoded.row(0).to_vec(), entry.to_vec());
        }
    }

    #[test]
    fn test_encode_rounds_components() {
        let palette = Palette::minipacman();
        assert_eq!(palette.encode_pixel([0.2, 0.7, 0.4]).unwrap(), 0);
        assert_eq!(palette.encode_pixel([0.9, 0.6, 1.3]).unwrap(), 3);
        assert_eq!(palette.encode_pixel([-0.3, 0.1, 0.0]).unwrap(), 5);
    }

    #[test]
    fn test_unknown_pixel_iff_absent() {
        let palette = Palette::minipacman();
        // Every rounded tuple in {0,1}^3 except magenta (1,0,1) is present.
        for r in [0.0, 1.0] {
            for g in [0.0, 1.0] {
                for b in [0.0, 1.0] {
                    let result = palette.encode_pixel([r, g, b]);
                    let present = palette.entries().contains(&[r, g, b]);
                    assert_eq!(result.is_ok(), present, "pixel {:?}", [r, g, b]);
                }
            }
        }
        assert!(matches!(
            palette.encode_pixel([1.0, 0.2, 0.8]),
            Err(I2aError::UnknownPixel { .. })
        ));
        assert!(matches!(
            palette.encode_pixel([2.0, 0.0, 0.0]),
            Err(I2aError::UnknownPixel { .. })
        ));
    }

    #[test]
    fn test_encode_pixels_rejects_wrong_width() {
        let palette = Palette::minipacman();
        let pixels = array![[0.0f32, 1.0], [1.0, 1.0]];
        assert!(matches!(
            palette.encode_pixels(pixels.view()),
            Err(I2aError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_out_of_range() {
        let palette = Palette::minipacman();
        assert!(matches!(
            palette.decode_categories(&[0, 7]),
            Err(I2aError::UnknownCategory { index: 7, .. })
        ));
        assert!(matches!(
            palette.decode_categories(&[-1]),
            Err(I2aError::UnknownCategory { index: -1, .. })
        ));
    }

    #[test]
    fn test_observation_targets_follow_row_major_cells() {
        let palette = Palette::minipacman();
        // One 2x2 observation: cells (0,0)=red, (0,1)=black, (1,0)=white, (1,1)=blue
        let cells: [[f32; 3]; 4] = [
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 1.0],
        ];
        let channel_last: Vec<f32> = cells.iter().flatten().copied().collect();
        let obs = Tensor::from_slice(&channel_last)
            .reshape([1, 2, 2, 3])
            .permute([0, 3, 1, 2]);

        let targets = palette.observation_to_targets(&obs).unwrap();
        assert_eq!(Vec::<i64>::try_from(&targets).unwrap(), vec![6, 5, 3, 2]);

        let decoded = palette.targets_to_observation(&targets, 2, 2).unwrap();
        assert_eq!(decoded.size(), [1, 3, 2, 2]);
        assert!(decoded.equal(&obs.contiguous()));
    }

    #[test]
    fn test_targets_to_observation_errors() {
        let palette = Palette::minipacman();
        let targets = Tensor::from_slice(&[0i64, 1, 2]);
        assert!(matches!(
            palette.targets_to_observation(&targets, 2, 2),
            Err(I2aError::ShapeMismatch { .. })
        ));

        let targets = Tensor::from_slice(&[0i64, 1, 2, 9]);
        assert!(matches!(
            palette.targets_to_observation(&targets, 2, 2),
            Err(I2aError::UnknownCategory { index: 9, .. })
        ));
    }

    #[test]
    fn test_reward_round_trip_all_modes() {
        for mode in TaskMode::ALL {
            let table = RewardTable::new(mode);
            let rewards = mode.rewards();
            let categories = table.encode_rewards(rewards).unwrap();
            assert_eq!(categories, (0..rewards.len() as i64).collect::<Vec<_>>());
            assert_eq!(table.decode_rewards(&categories).unwrap(), rewards);
        }
    }

    #[test]
    fn test_reward_exact_match_required() {
        let table = RewardTable::new(TaskMode::Avoid);
        assert_eq!(table.encode_rewards(&[0.1, -20.0]).unwrap(), vec![0, 4]);
        assert!(matches!(
            table.encode_rewards(&[0.1001]),
            Err(I2aError::UnknownReward { .. })
        ));
        // 1.0 belongs to hunt, not avoid
        assert!(table.encode_rewards(&[1.0]).is_err());
    }

    #[test]
    fn test_reward_one_hot() {
        let table = RewardTable::new(TaskMode::Hunt);
        let targets = table
            .rewards_to_targets(&Tensor::from_slice(&[10.0f32, -20.0, 0.0]))
            .unwrap();
        let one_hot = table.one_hot(&targets).unwrap();
        assert_eq!(one_hot.size(), [3, 4]);
        let expected = Tensor::from_slice(&[
            0.0f32, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0, 0.0,
        ])
        .reshape([3, 4]);
        assert!(one_hot.equal(&expected));

        assert!(table.one_hot(&Tensor::from_slice(&[4i64])).is_err());
    }
}
