// 该文件是 Wuding （屋顶） 项目的一部分。
// src/input.rs - 图像输入与预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageReader, Luma, imageops::FilterType};
use imageproc::{
  contrast::equalize_histogram,
  geometric_transformations::{Interpolation, Projection, warp_into},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  FromUrl,
  geometry::{ImageDims, RotationTransform},
};

mod image_folder;
mod read_image_file;

pub use self::image_folder::{ImageFolderInput, ImageFolderIter};
pub use self::read_image_file::{ImageFileInput, ImageFileIter};

/// 缩小检测时每个维度的缩放倍数
pub const DOWNSIZE_FACTOR: u32 = 2;

#[derive(Error, Debug)]
pub enum ImageLoadError {
  #[error("无法读取图像 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  Decode {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("图像尺寸为零: {0}")]
  Empty(PathBuf),
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法列出目录 {path}: {source}")]
  ListDirectory {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 经过灰度化、直方图均衡与可选缩小的待检测图像
#[derive(Debug, Clone)]
pub struct PreparedImage {
  pub gray: GrayImage,
  /// 原始分辨率
  pub original: ImageDims,
  /// 检测坐标乘以该系数即回到原始分辨率
  pub restore_factor: f32,
}

impl PreparedImage {
  pub fn from_gray(gray: GrayImage, downsized: bool) -> Self {
    let original = ImageDims::new(gray.width(), gray.height());
    let equalized = equalize_histogram(&gray);
    if !downsized {
      return Self {
        gray: equalized,
        original,
        restore_factor: 1.0,
      };
    }

    let w = (original.width / DOWNSIZE_FACTOR).max(1);
    let h = (original.height / DOWNSIZE_FACTOR).max(1);
    Self {
      gray: image::imageops::resize(&equalized, w, h, FilterType::Triangle),
      original,
      restore_factor: DOWNSIZE_FACTOR as f32,
    }
  }

  /// 实际参与检测的图像尺寸
  pub fn dims(&self) -> ImageDims {
    ImageDims::new(self.gray.width(), self.gray.height())
  }
}

/// 读取一幅图像并完成预处理
pub fn load_prepared(path: &Path, downsized: bool) -> Result<PreparedImage, ImageLoadError> {
  let gray = ImageReader::open(path)
    .map_err(|source| ImageLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .decode()
    .map_err(|source| ImageLoadError::Decode {
      path: path.to_path_buf(),
      source,
    })?
    .to_luma8();

  if gray.width() == 0 || gray.height() == 0 {
    return Err(ImageLoadError::Empty(path.to_path_buf()));
  }
  debug!("读取图像 {}: {}x{}", path.display(), gray.width(), gray.height());

  Ok(PreparedImage::from_gray(gray, downsized))
}

/// 按旋转平面旋转像素，输出尺寸为扩展后的画布尺寸，画布外区域填 0
pub fn rotate_image(gray: &GrayImage, transform: &RotationTransform) -> GrayImage {
  if transform.is_identity() {
    return gray.clone();
  }

  let dims = transform.rotated_dims();
  let mut out = GrayImage::new(dims.width, dims.height);
  let Some(projection) = Projection::from_matrix(transform.forward_matrix()) else {
    warn!("旋转矩阵不可逆，角度 {}", transform.angle());
    return out;
  };
  warp_into(gray, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
  out
}

/// 输入中的一幅图像，读取失败只影响这一项
#[derive(Debug)]
pub struct ImageItem {
  pub id: String,
  pub path: PathBuf,
  pub image: Result<PreparedImage, ImageLoadError>,
}

/// 尚未读取的图像，由处理它的工作线程在开始检测前读取
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImage {
  pub id: String,
  pub path: PathBuf,
  pub downsized: bool,
}

impl PendingImage {
  pub fn new(path: PathBuf, downsized: bool) -> Self {
    let id = path
      .file_name()
      .map(|name| name.to_string_lossy().to_string())
      .unwrap_or_else(|| path.display().to_string());
    Self {
      id,
      path,
      downsized,
    }
  }
}

/// 批量任务的输入项，`load` 推迟到真正处理时才调用
pub trait ImageSource: Send {
  fn id(&self) -> &str;
  fn load(self) -> ImageItem;
}

impl ImageSource for PendingImage {
  fn id(&self) -> &str {
    &self.id
  }

  fn load(self) -> ImageItem {
    let image = load_prepared(&self.path, self.downsized);
    ImageItem {
      id: self.id,
      path: self.path,
      image,
    }
  }
}

impl ImageSource for ImageItem {
  fn id(&self) -> &str {
    &self.id
  }

  fn load(self) -> ImageItem {
    self
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .map(|ext| {
      let lower = ext.to_string_lossy().to_lowercase();
      lower == "jpg" || lower == "jpeg" || lower == "png"
    })
    .unwrap_or(false)
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageFolder(ImageFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageFolderInput::SCHEME => Ok(InputWrapper::ImageFolder(ImageFolderInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputWrapper {
  pub fn len(&self) -> usize {
    match self {
      InputWrapper::ReadImageFile(_) => 1,
      InputWrapper::ImageFolder(input) => input.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn into_images(self, downsized: bool) -> InputImages {
    match self {
      InputWrapper::ReadImageFile(input) => InputImages::ReadImageFile(input.into_images(downsized)),
      InputWrapper::ImageFolder(input) => InputImages::ImageFolder(input.into_images(downsized)),
    }
  }
}

pub enum InputImages {
  ReadImageFile(ImageFileIter),
  ImageFolder(ImageFolderIter),
}

impl Iterator for InputImages {
  type Item = PendingImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputImages::ReadImageFile(input) => input.next(),
      InputImages::ImageFolder(input) => input.next(),
    }
  }
}
