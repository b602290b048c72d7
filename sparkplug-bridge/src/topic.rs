use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NBirth,
    DBirth,
    NDeath,
    DDeath,
    NData,
    DData,
    NCmd,
    DCmd,
}

impl MessageType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "NBIRTH" => Self::NBirth,
            "DBIRTH" => Self::DBirth,
            "NDEATH" => Self::NDeath,
            "DDEATH" => Self::DDeath,
            "NDATA" => Self::NData,
            "DDATA" => Self::DData,
            "NCMD" => Self::NCmd,
            "DCMD" => Self::DCmd,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NBirth => "NBIRTH",
            Self::DBirth => "DBIRTH",
            Self::NDeath => "NDEATH",
            Self::DDeath => "DDEATH",
            Self::NData => "NDATA",
            Self::DData => "DDATA",
            Self::NCmd => "NCMD",
            Self::DCmd => "DCMD",
        }
    }

    pub fn is_birth(&self) -> bool {
        matches!(self, Self::NBirth | Self::DBirth)
    }

    pub fn is_death(&self) -> bool {
        matches!(self, Self::NDeath | Self::DDeath)
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Self::NCmd | Self::DCmd)
    }
}

/// Entité logique adressable : un edge node, ou un device sous ce node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId {
    pub group: String,
    pub edge_node: String,
    pub device: Option<String>,
}

impl EntityId {
    pub fn node(group: impl Into<String>, edge_node: impl Into<String>) -> Self {
        Self { group: group.into(), edge_node: edge_node.into(), device: None }
    }

    pub fn device(group: impl Into<String>, edge_node: impl Into<String>, device: impl Into<String>) -> Self {
        Self { group: group.into(), edge_node: edge_node.into(), device: Some(device.into()) }
    }

    /// Le node parent (soi-même pour un node)
    pub fn node_of(&self) -> Self {
        Self::node(self.group.clone(), self.edge_node.clone())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}/{}/{}", self.group, self.edge_node, device),
            None => write!(f, "{}/{}", self.group, self.edge_node),
        }
    }
}

/// Topic Sparkplug : `{namespace}/{group}/{type}/{edge_node}[/{device}]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparkplugTopic {
    pub namespace: String,
    pub message_type: MessageType,
    pub entity: EntityId,
}

impl SparkplugTopic {
    pub fn parse(topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        let (namespace, group, kind, edge_node, device) = match parts.as_slice() {
            [ns, group, kind, node] => (*ns, *group, *kind, *node, None),
            [ns, group, kind, node, device] => (*ns, *group, *kind, *node, Some(*device)),
            _ => return None,
        };
        let message_type = MessageType::parse(kind)?;
        if namespace.is_empty() || group.is_empty() || edge_node.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            message_type,
            entity: EntityId {
                group: group.to_string(),
                edge_node: edge_node.to_string(),
                device: device.map(str::to_string),
            },
        })
    }
}

/// Topic de commande node : `{namespace}/{group}/NCMD/{edge_node}`
pub fn node_command_topic(namespace: &str, group: &str, edge_node: &str) -> String {
    format!("{namespace}/{group}/{}/{edge_node}", MessageType::NCmd.as_str())
}

/// Topic de commande device : `{namespace}/{group}/DCMD/{device}`
pub fn device_command_topic(namespace: &str, group: &str, device: &str) -> String {
    format!("{namespace}/{group}/{}/{device}", MessageType::DCmd.as_str())
}

/// Wildcard couvrant tous les types de messages d'un groupe
pub fn group_wildcard(namespace: &str, group: &str) -> String {
    format!("{namespace}/{group}/#")
}
