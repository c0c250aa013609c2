//! Tasking extension: Actuator, TaskingCapability and Task
//!
//! Extends the core Thing type, so it can only register once the core model
//! is present.

use super::{ModelPlugin, PluginInit, require_types};
use crate::core::error::ModelError;
use crate::model::{
    EntityPropertyMain, EntityTypeBuilder, ModelRegistryBuilder, NavigationKind::*, Relation,
};

pub const PLUGIN_NAME: &str = "actuation";

pub struct ActuationPlugin;

impl ModelPlugin for ActuationPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn register(&self, builder: &mut ModelRegistryBuilder) -> Result<PluginInit, ModelError> {
        if let Some(not_ready) = require_types(builder, &["Thing"]) {
            return Ok(not_ready);
        }

        builder.register_entity_type(
            EntityTypeBuilder::new("Actuator")
                .property(EntityPropertyMain::new("name"), true)
                .property(EntityPropertyMain::new("description"), true)
                .property(EntityPropertyMain::new("encodingType"), true)
                .property(EntityPropertyMain::new("metadata"), true)
                .property(
                    EntityPropertyMain::new("properties").with_custom_properties(),
                    false,
                ),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("TaskingCapability")
                .property(EntityPropertyMain::new("name"), true)
                .property(EntityPropertyMain::new("description"), true)
                .property(
                    EntityPropertyMain::new("taskingParameters").with_custom_properties(),
                    true,
                )
                .property(
                    EntityPropertyMain::new("properties").with_custom_properties(),
                    false,
                ),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("Task")
                .property(EntityPropertyMain::new("creationTime"), false)
                .property(
                    EntityPropertyMain::new("taskingParameters").with_custom_properties(),
                    true,
                ),
        )?;

        builder.register_relation(
            Relation::new(
                "TaskingCapability",
                "Thing",
                ToOne,
                "Thing",
                "TaskingCapabilities",
                ToMany,
            )
            .required(),
        )?;
        builder.register_relation(
            Relation::new(
                "TaskingCapability",
                "Actuator",
                ToOne,
                "Actuator",
                "TaskingCapabilities",
                ToMany,
            )
            .required(),
        )?;
        builder.register_relation(
            Relation::new(
                "Task",
                "TaskingCapability",
                ToOne,
                "TaskingCapability",
                "Tasks",
                ToMany,
            )
            .required(),
        )?;

        Ok(PluginInit::Done)
    }
}
