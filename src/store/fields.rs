// store/fields.rs - 全文索引字段名常量
//! 统一管理影子索引的字段名，避免魔法字符串

/// 记录 id（删除 / 替换影子文档的键）
pub const FIELD_ID: &str = "media_id";
/// 完整文件路径
pub const FIELD_PATH: &str = "path";
/// AI 生成的描述
pub const FIELD_DESCRIPTION: &str = "description";
/// 场景类型
pub const FIELD_SCENE_TYPE: &str = "scene_type";
/// 从内容中提取的文本
pub const FIELD_EXTRACTED_TEXT: &str = "extracted_text";
/// AI 生成的标签
pub const FIELD_TAGS: &str = "tags";
/// 检测到的物体
pub const FIELD_DETECTED_OBJECTS: &str = "detected_objects";

/// 分词器名称（jieba + 小写）
pub const TOKENIZER_NAME: &str = "jieba_lower";
