//! Mapping model loader for YAML and JSON model files.
//!
//! A file holds either a single model or a `models:` bundle. Node namespaces
//! are written as prefixes and resolved through the model's `namespaces`
//! table; a node without one inherits its parent's.

use crate::delimiters::Delimiters;
use crate::model::{
    ComponentDef, DataType, Description, FieldDef, GroupItem, MappingModel, MaxOccurs, Namespace,
    Occurs, SegmentDef, SegmentGroup, SubComponentDef, ValueSpec,
};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MappingFile {
    Bundle { models: Vec<ModelFile> },
    Single(Box<ModelFile>),
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    description: DescriptionFile,
    #[serde(default)]
    namespaces: BTreeMap<String, String>,
    #[serde(default)]
    delimiters: Option<Delimiters>,
    root: GroupFile,
}

#[derive(Debug, Deserialize)]
struct DescriptionFile {
    name: String,
    version: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    xmltag: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    min_occurs: Option<usize>,
    #[serde(default)]
    max_occurs: Option<MaxOccursFile>,
    #[serde(default)]
    items: Vec<ItemFile>,
}

/// One entry of a group's `items`: exactly one of `segment` or `group`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItemFile {
    #[serde(default)]
    segment: Option<SegmentFile>,
    #[serde(default)]
    group: Option<GroupFile>,
}

#[derive(Debug, Deserialize)]
struct SegmentFile {
    segcode: String,
    xmltag: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    min_occurs: Option<usize>,
    #[serde(default)]
    max_occurs: Option<MaxOccursFile>,
    #[serde(default)]
    truncatable: bool,
    #[serde(default)]
    ignore_unmapped_fields: bool,
    #[serde(default)]
    fields: Vec<FieldFile>,
}

#[derive(Debug, Deserialize)]
struct FieldFile {
    xmltag: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    truncatable: bool,
    #[serde(flatten)]
    value: ValueFile,
    #[serde(default)]
    components: Vec<ComponentFile>,
}

#[derive(Debug, Deserialize)]
struct ComponentFile {
    xmltag: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    truncatable: bool,
    #[serde(flatten)]
    value: ValueFile,
    #[serde(default)]
    sub_components: Vec<SubComponentFile>,
}

#[derive(Debug, Deserialize)]
struct SubComponentFile {
    xmltag: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(flatten)]
    value: ValueFile,
}

#[derive(Debug, Default, Deserialize)]
struct ValueFile {
    #[serde(default, alias = "type")]
    data_type: Option<DataType>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
}

/// `max_occurs` accepts a count, `-1`, `"unbounded"` or `"*"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaxOccursFile {
    Count(i64),
    Keyword(String),
}

/// Load every model in a file; `.yaml`/`.yml` is read as YAML, anything
/// else as JSON.
pub fn load_from_file(path: &Path) -> Result<Vec<MappingModel>> {
    trace!("Loading mapping models from file: {:?}", path);
    let content = std::fs::read_to_string(path)?;

    if path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
    {
        load_from_yaml(&content)
    } else {
        load_from_json(&content)
    }
}

/// Load models from a JSON document
pub fn load_from_json(json: &str) -> Result<Vec<MappingModel>> {
    let file: MappingFile = serde_json::from_str(json)
        .map_err(|e| Error::InvalidFormat(format!("JSON parse error: {e}")))?;
    convert_file(file)
}

/// Load models from a YAML document
pub fn load_from_yaml(yaml: &str) -> Result<Vec<MappingModel>> {
    let file: MappingFile = serde_yaml::from_str(yaml)
        .map_err(|e| Error::InvalidFormat(format!("YAML parse error: {e}")))?;
    convert_file(file)
}

fn convert_file(file: MappingFile) -> Result<Vec<MappingModel>> {
    let files = match file {
        MappingFile::Bundle { models } => models,
        MappingFile::Single(model) => vec![*model],
    };
    let models = files
        .into_iter()
        .map(convert_model)
        .collect::<Result<Vec<_>>>()?;
    debug!("Loaded {} mapping model(s)", models.len());
    Ok(models)
}

/// Resolution state while converting one model.
struct Converter {
    model: String,
    namespaces: BTreeMap<String, String>,
}

impl Converter {
    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidModel {
            model: self.model.clone(),
            reason: reason.into(),
        }
    }

    fn namespace(
        &self,
        prefix: Option<&str>,
        inherited: Option<&Namespace>,
    ) -> Result<Option<Namespace>> {
        match prefix {
            Some(prefix) => {
                let uri = self.namespaces.get(prefix).ok_or_else(|| {
                    self.invalid(format!("namespace prefix '{prefix}' is not declared"))
                })?;
                Ok(Some(Namespace {
                    prefix: prefix.to_string(),
                    uri: uri.clone(),
                }))
            }
            None => Ok(inherited.cloned()),
        }
    }

    fn occurs(
        &self,
        node: &str,
        min: Option<usize>,
        max: Option<&MaxOccursFile>,
        default: Occurs,
    ) -> Result<Occurs> {
        let max = match max {
            None => default.max,
            Some(MaxOccursFile::Count(-1)) => MaxOccurs::Unbounded,
            Some(MaxOccursFile::Count(n)) => usize::try_from(*n)
                .map(MaxOccurs::Bounded)
                .map_err(|_| self.invalid(format!("'{node}' has negative max_occurs {n}")))?,
            Some(MaxOccursFile::Keyword(k)) if k == "unbounded" || k == "*" => {
                MaxOccurs::Unbounded
            }
            Some(MaxOccursFile::Keyword(k)) => {
                return Err(self.invalid(format!("'{node}' has invalid max_occurs '{k}'")));
            }
        };
        let occurs = Occurs::new(min.unwrap_or(default.min), max);
        if !occurs.is_consistent() {
            return Err(self.invalid(format!("'{node}' has min_occurs above max_occurs ({occurs})")));
        }
        Ok(occurs)
    }

    fn group(&self, file: GroupFile, inherited: Option<&Namespace>, default: Occurs) -> Result<SegmentGroup> {
        let namespace = self.namespace(file.namespace.as_deref(), inherited)?;
        let occurs = self.occurs(&file.xmltag, file.min_occurs, file.max_occurs.as_ref(), default)?;
        let items = file
            .items
            .into_iter()
            .map(|item| match (item.segment, item.group) {
                (Some(segment), None) => {
                    self.segment(segment, namespace.as_ref()).map(GroupItem::Segment)
                }
                (None, Some(group)) => self
                    .group(group, namespace.as_ref(), Occurs::OPTIONAL)
                    .map(GroupItem::Group),
                _ => Err(self.invalid(format!(
                    "every item of group '{}' must be exactly one segment or group",
                    file.xmltag
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(GroupItem::Group(first)) = items.first() {
            if first.trigger_code().is_none() {
                return Err(self.invalid(format!("group '{}' has no opening segment", first.xmltag)));
            }
        }

        Ok(SegmentGroup {
            xmltag: file.xmltag,
            namespace,
            occurs,
            items,
        })
    }

    fn segment(&self, file: SegmentFile, inherited: Option<&Namespace>) -> Result<SegmentDef> {
        if file.segcode.is_empty() {
            return Err(self.invalid(format!("segment '{}' has an empty segcode", file.xmltag)));
        }
        let namespace = self.namespace(file.namespace.as_deref(), inherited)?;
        let occurs = self.occurs(&file.segcode, file.min_occurs, file.max_occurs.as_ref(), Occurs::OPTIONAL)?;
        let fields = file
            .fields
            .into_iter()
            .map(|field| self.field(field, namespace.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(SegmentDef {
            segcode: file.segcode,
            xmltag: file.xmltag,
            description: file.description,
            namespace,
            occurs,
            truncatable: file.truncatable,
            ignore_unmapped_fields: file.ignore_unmapped_fields,
            fields,
        })
    }

    fn field(&self, file: FieldFile, inherited: Option<&Namespace>) -> Result<FieldDef> {
        let namespace = self.namespace(file.namespace.as_deref(), inherited)?;
        let value = self.value(&file.xmltag, file.value)?;
        let components = file
            .components
            .into_iter()
            .map(|component| self.component(component, namespace.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(FieldDef {
            xmltag: file.xmltag,
            namespace,
            required: file.required,
            truncatable: file.truncatable,
            value,
            components,
        })
    }

    fn component(&self, file: ComponentFile, inherited: Option<&Namespace>) -> Result<ComponentDef> {
        let namespace = self.namespace(file.namespace.as_deref(), inherited)?;
        let value = self.value(&file.xmltag, file.value)?;
        let sub_components = file
            .sub_components
            .into_iter()
            .map(|sub| {
                Ok(SubComponentDef {
                    namespace: self.namespace(sub.namespace.as_deref(), namespace.as_ref())?,
                    value: self.value(&sub.xmltag, sub.value)?,
                    xmltag: sub.xmltag,
                    required: sub.required,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ComponentDef {
            xmltag: file.xmltag,
            namespace,
            required: file.required,
            truncatable: file.truncatable,
            value,
            sub_components,
        })
    }

    fn value(&self, node: &str, file: ValueFile) -> Result<ValueSpec> {
        if let (Some(min), Some(max)) = (file.min_length, file.max_length) {
            if min > max {
                return Err(self.invalid(format!("'{node}' has min_length {min} above max_length {max}")));
            }
        }
        Ok(ValueSpec {
            data_type: file.data_type.unwrap_or_default(),
            format: file.format,
            min_length: file.min_length,
            max_length: file.max_length,
        })
    }
}

fn convert_model(file: ModelFile) -> Result<MappingModel> {
    let converter = Converter {
        model: format!("{}:{}", file.description.name, file.description.version),
        namespaces: file.namespaces,
    };

    if let Some(delimiters) = &file.delimiters {
        delimiters
            .validate()
            .map_err(|e| converter.invalid(e.to_string()))?;
    }

    let model_namespace = converter.namespace(file.description.namespace.as_deref(), None)?;
    let root = converter.group(file.root, model_namespace.as_ref(), Occurs::ONCE)?;
    trace!("Converted mapping model {}", converter.model);

    Ok(MappingModel::new(
        Description {
            name: file.description.name,
            version: file.description.version,
            namespace: model_namespace,
        },
        file.delimiters,
        converter.namespaces,
        root,
    ))
}
