//! The SensorThings core data model
//!
//! Thing, Location, HistoricalLocation, Datastream, Sensor, ObservedProperty,
//! Observation and FeatureOfInterest with their relations.

use super::{ModelPlugin, PluginInit};
use crate::core::error::ModelError;
use crate::model::{
    EntityPropertyMain, EntityTypeBuilder, ModelRegistryBuilder, NavigationKind::*, Relation,
};

pub const PLUGIN_NAME: &str = "core";

pub struct CoreModelPlugin;

fn prop(name: &str) -> EntityPropertyMain {
    EntityPropertyMain::new(name)
}

fn custom(name: &str) -> EntityPropertyMain {
    EntityPropertyMain::new(name).with_custom_properties()
}

impl ModelPlugin for CoreModelPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn register(&self, builder: &mut ModelRegistryBuilder) -> Result<PluginInit, ModelError> {
        builder.register_entity_type(
            EntityTypeBuilder::new("Thing")
                .property(prop("name"), true)
                .property(prop("description"), true)
                .property(custom("properties"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("Location")
                .property(prop("name"), true)
                .property(prop("description"), true)
                .property(prop("encodingType"), true)
                .property(prop("location"), true)
                .property(custom("properties"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("HistoricalLocation").property(prop("time"), true),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("Datastream")
                .property(prop("name"), true)
                .property(prop("description"), true)
                .property(prop("observationType"), true)
                .property(prop("unitOfMeasurement"), true)
                .property(prop("observedArea"), false)
                .property(prop("phenomenonTime"), false)
                .property(prop("resultTime"), false)
                .property(custom("properties"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("Sensor")
                .property(prop("name"), true)
                .property(prop("description"), true)
                .property(prop("encodingType"), true)
                .property(prop("metadata"), true)
                .property(custom("properties"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("ObservedProperty")
                .property(prop("name"), true)
                .property(prop("definition"), true)
                .property(prop("description"), true)
                .property(custom("properties"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("Observation")
                .property(prop("phenomenonTime"), false)
                .property(prop("resultTime"), false)
                .property(custom("result"), true)
                .property(prop("resultQuality"), false)
                .property(prop("validTime"), false)
                .property(custom("parameters"), false),
        )?;
        builder.register_entity_type(
            EntityTypeBuilder::new("FeatureOfInterest")
                .property(prop("name"), true)
                .property(prop("description"), true)
                .property(prop("encodingType"), true)
                .property(prop("feature"), true)
                .property(custom("properties"), false),
        )?;

        builder.register_relation(Relation::new(
            "Thing",
            "Locations",
            ToMany,
            "Location",
            "Things",
            ToMany,
        ))?;
        builder.register_relation(
            Relation::new(
                "HistoricalLocation",
                "Thing",
                ToOne,
                "Thing",
                "HistoricalLocations",
                ToMany,
            )
            .required(),
        )?;
        builder.register_relation(Relation::new(
            "HistoricalLocation",
            "Locations",
            ToMany,
            "Location",
            "HistoricalLocations",
            ToMany,
        ))?;
        builder.register_relation(
            Relation::new("Datastream", "Thing", ToOne, "Thing", "Datastreams", ToMany)
                .required(),
        )?;
        builder.register_relation(
            Relation::new("Datastream", "Sensor", ToOne, "Sensor", "Datastreams", ToMany)
                .required(),
        )?;
        builder.register_relation(
            Relation::new(
                "Datastream",
                "ObservedProperty",
                ToOne,
                "ObservedProperty",
                "Datastreams",
                ToMany,
            )
            .required(),
        )?;
        builder.register_relation(
            Relation::new(
                "Observation",
                "Datastream",
                ToOne,
                "Datastream",
                "Observations",
                ToMany,
            )
            .required(),
        )?;
        builder.register_relation(Relation::new(
            "Observation",
            "FeatureOfInterest",
            ToOne,
            "FeatureOfInterest",
            "Observations",
            ToMany,
        ))?;

        Ok(PluginInit::Done)
    }
}
