// 该文件是 Wuding （屋顶） 项目的一部分。
// src/input/read_image_file.rs - 单幅图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, PendingImage},
};

pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    // 图像在迭代时才读取，读取失败作为该图像的结果返回
    Ok(ImageFileInput {
      path: PathBuf::from(url.path()),
    })
  }
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn into_images(self, downsized: bool) -> ImageFileIter {
    ImageFileIter {
      path: Some(self.path),
      downsized,
    }
  }
}

pub struct ImageFileIter {
  path: Option<PathBuf>,
  downsized: bool,
}

impl Iterator for ImageFileIter {
  type Item = PendingImage;

  fn next(&mut self) -> Option<Self::Item> {
    let downsized = self.downsized;
    self.path.take().map(|path| PendingImage::new(path, downsized))
  }
}
