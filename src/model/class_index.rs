//! クラスインデックス表
//!
//! 分類器の出力ユニット番号とクラス名の対応を JSON (`{"クラス名": インデックス}`) で保持します。
//! サーバー起動時に1度だけ読み込み、以後は変更しません。

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// クラスインデックス表（インデックス順のクラス名）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndexTable {
    labels: Vec<String>,
}

impl ClassIndexTable {
    /// インデックス順のラベル列から作成
    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// `{"name": index}` 形式の JSON 文字列から作成
    ///
    /// インデックスは 0 から始まる連番でなければならない。
    pub fn from_json_str(json: &str) -> Result<Self> {
        let map: BTreeMap<String, usize> =
            serde_json::from_str(json).context("Failed to parse class index JSON")?;

        let count = map.len();
        let mut slots: Vec<Option<String>> = vec![None; count];
        for (name, index) in map {
            let slot = slots.get_mut(index).ok_or_else(|| {
                anyhow::anyhow!(
                    "クラス '{}' のインデックス {} が範囲外です (クラス数: {})",
                    name,
                    index,
                    count
                )
            })?;
            if let Some(existing) = slot {
                anyhow::bail!(
                    "インデックス {} が '{}' と '{}' で重複しています",
                    index,
                    existing,
                    name
                );
            }
            *slot = Some(name);
        }

        // 件数 == スロット数 かつ 範囲内・重複なし なので全スロットが埋まっている
        let labels = slots.into_iter().flatten().collect();
        Ok(Self { labels })
    }

    /// ファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read class index file: {:?}", path))?;
        Self::from_json_str(&content).context(format!("Invalid class index file: {:?}", path))
    }

    /// `{"name": index}` 形式の JSON 文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        let map: BTreeMap<&str, usize> = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        serde_json::to_string_pretty(&map).context("Failed to serialize class index table")
    }

    /// ファイルへ保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_string()?)
            .context(format!("Failed to write class index file: {:?}", path))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// インデックスからクラス名を取得
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// 表に無いインデックスは `class_<index>` とする
    pub fn label_or_placeholder(&self, index: usize) -> String {
        self.label(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class_{}", index))
    }

    /// 分類器の出力幅と表のサイズが一致するか確認
    pub fn ensure_matches_output(&self, output_units: usize) -> Result<()> {
        if self.labels.len() != output_units {
            anyhow::bail!(
                "クラスインデックス表のクラス数 ({}) が分類器の出力ユニット数 ({}) と一致しません",
                self.labels.len(),
                output_units
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inverts_mapping() {
        let table =
            ClassIndexTable::from_json_str(r#"{"sushi": 2, "pizza": 0, "ramen": 1}"#).unwrap();
        assert_eq!(table.labels(), &["pizza", "ramen", "sushi"]);
        assert_eq!(table.label(1), Some("ramen"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_placeholder_for_unknown_index() {
        let table = ClassIndexTable::from_labels(vec!["pizza".into()]);
        assert_eq!(table.label_or_placeholder(0), "pizza");
        assert_eq!(table.label_or_placeholder(4), "class_4");
    }

    #[test]
    fn test_rejects_gap_in_indices() {
        let err = ClassIndexTable::from_json_str(r#"{"pizza": 0, "sushi": 2}"#).unwrap_err();
        assert!(err.to_string().contains("範囲外"));
    }

    #[test]
    fn test_rejects_duplicate_indices() {
        let err = ClassIndexTable::from_json_str(r#"{"pizza": 0, "sushi": 0}"#).unwrap_err();
        assert!(err.to_string().contains("重複"));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(ClassIndexTable::from_json_str("[\"pizza\"]").is_err());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let path = std::env::temp_dir().join(format!(
            "food_class_indices_{}.json",
            std::process::id()
        ));
        let table = ClassIndexTable::from_labels(vec!["curry".into(), "gyoza".into()]);
        table.save(&path).unwrap();

        let loaded = ClassIndexTable::load(&path).unwrap();
        assert_eq!(loaded, table);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_output_width_check() {
        let table = ClassIndexTable::from_labels(vec!["a".into(), "b".into()]);
        assert!(table.ensure_matches_output(2).is_ok());
        assert!(table.ensure_matches_output(3).is_err());
    }
}
