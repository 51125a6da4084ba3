use crate::config::I2aConfig;
use crate::policy::HasVarStore;
use crate::{ensure_shape, Result};
use tch::{nn, Device, Tensor};

/// Learned, categorical model of the environment.
///
/// `predict` takes states with one-hot action planes concatenated on the
/// channel dimension, `[N, C + A, H, W]`, and returns
/// - per-cell logits over the pixel palette, `[N * H * W, num_pixels]`, rows
///   ordered by batch element, then row, then column
/// - per-element logits over the reward table, `[N, num_rewards]`
pub trait EnvironmentModel {
    fn predict(&self, inputs: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// 3x3 "same" convolution
fn conv3x3(p: nn::Path, c_in: i64, c_out: i64) -> nn::Conv2D {
    nn::conv2d(
        &p,
        c_in,
        c_out,
        3,
        nn::ConvConfig {
            padding: 1,
            ..Default::default()
        },
    )
}

/// 1x1 convolution
fn conv1x1(p: nn::Path, c_in: i64, c_out: i64) -> nn::Conv2D {
    nn::conv2d(&p, c_in, c_out, 1, Default::default())
}

/// Residual block that broadcasts a global max-pool back over the grid, so
/// every cell sees the whole board.
#[derive(Debug)]
struct PoolInject {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
}

impl PoolInject {
    fn new(p: nn::Path, channels: i64) -> Self {
        Self {
            conv1: conv3x3(&p / "conv1", channels * 2, channels),
            conv2: conv3x3(&p / "conv2", channels, channels),
        }
    }
}

impl nn::Module for PoolInject {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let pooled = xs.amax([2, 3], true).expand_as(xs);
        let h = Tensor::cat(&[xs, &pooled], 1).apply(&self.conv1).relu();
        h.apply(&self.conv2).relu() + xs
    }
}

/// Convolutional categorical environment model.
pub struct ConvEnvModel {
    vs: nn::VarStore,
    trunk: nn::Sequential,
    image_head: nn::Conv2D,
    reward_conv: nn::Conv2D,
    reward_fc: nn::Linear,
    in_channels: i64,
    num_pixels: i64,
    device: Device,
}

impl ConvEnvModel {
    pub const CHANNELS: i64 = 64;

    /// Create a model for `config`'s observation shape, action count and reward
    /// table, predicting over `num_pixels` palette colours.
    pub fn new(config: &I2aConfig, num_pixels: i64) -> Self {
        let device = config.device;
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let in_channels = config.in_shape[0] + config.num_actions;

        let trunk = nn::seq()
            .add(conv1x1(&root / "conv_in", in_channels, Self::CHANNELS))
            .add_fn(|x| x.relu())
            .add(PoolInject::new(&root / "block1", Self::CHANNELS))
            .add(PoolInject::new(&root / "block2", Self::CHANNELS));

        let image_head = conv1x1(&root / "image_head", Self::CHANNELS, num_pixels);
        let reward_conv = conv1x1(&root / "reward_conv", Self::CHANNELS, Self::CHANNELS);
        let reward_fc = nn::linear(
            &root / "reward_fc",
            Self::CHANNELS,
            config.num_rewards(),
            Default::default(),
        );

        Self {
            vs,
            trunk,
            image_head,
            reward_conv,
            reward_fc,
            in_channels,
            num_pixels,
            device,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl EnvironmentModel for ConvEnvModel {
    fn predict(&self, inputs: &Tensor) -> Result<(Tensor, Tensor)> {
        let size = inputs.size();
        let channels = if size.len() == 4 { size[1] } else { -1 };
        ensure_shape("environment model input channels", &[self.in_channels], &[channels])?;

        let h = inputs.to_device(self.device).apply(&self.trunk);

        let state_logits = h
            .apply(&self.image_head)
            .permute([0, 2, 3, 1])
            .reshape([-1, self.num_pixels]);

        let reward_logits = h
            .apply(&self.reward_conv)
            .relu()
            .amax([2, 3], false)
            .apply(&self.reward_fc);

        Ok((state_logits, reward_logits))
    }
}

impl HasVarStore for ConvEnvModel {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}
