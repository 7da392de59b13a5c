// 该文件是 Wuding （屋顶） 项目的一部分。
// src/input/image_folder.rs - 图像目录输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, PendingImage, is_image_file},
};

/// 目录下的全部图像文件，按文件名排序
pub struct ImageFolderInput {
  files: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(Path::new(url.path()))
  }
}

impl ImageFolderInput {
  pub fn open(directory: &Path) -> Result<Self, InputError> {
    let list_error = |source| InputError::ListDirectory {
      path: directory.to_path_buf(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(list_error)? {
      let path = entry.map_err(list_error)?.path();
      if path.is_file() && is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();

    info!("目录 {} 中共有 {} 幅图像", directory.display(), files.len());
    Ok(ImageFolderInput { files })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn into_images(self, downsized: bool) -> ImageFolderIter {
    ImageFolderIter {
      files: self.files.into_iter(),
      downsized,
    }
  }
}

pub struct ImageFolderIter {
  files: std::vec::IntoIter<PathBuf>,
  downsized: bool,
}

impl Iterator for ImageFolderIter {
  type Item = PendingImage;

  fn next(&mut self) -> Option<Self::Item> {
    let downsized = self.downsized;
    self.files.next().map(|path| PendingImage::new(path, downsized))
  }
}
