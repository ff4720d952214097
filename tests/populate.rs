mod common;

use bulk_populate::builder::RoiLink;
use bulk_populate::data::TypedValue;
use bulk_populate::directive::detect_header_tokens;
use bulk_populate::entity::{ContainerKind, EntityKind, Target};
use bulk_populate::error::{PopulateError, UnresolvedCause};
use bulk_populate::hierarchy::InMemoryHierarchy;
use bulk_populate::io_utils;
use bulk_populate::populate::{PopulateOptions, populate_path};
use bulk_populate::rows::RowStream;
use bulk_populate::table::{ColumnData, ColumnKind, ColumnSource};
use common::{fixture_hierarchy, fixture_path, populate_str};

fn defaults() -> PopulateOptions {
    PopulateOptions::default()
}

fn kinds(table: &bulk_populate::table::Table) -> Vec<(String, ColumnKind)> {
    table
        .specs()
        .into_iter()
        .map(|spec| (spec.name.clone(), spec.kind))
        .collect()
}

#[test]
fn dataset_image_names_resolve_to_ids() {
    let hierarchy = fixture_hierarchy();
    let populated = populate_path(
        &fixture_path("dataset_images.csv"),
        Target::new(ContainerKind::Dataset, 5),
        &hierarchy,
        &defaults(),
    )
    .expect("populate dataset");

    assert_eq!(
        kinds(&populated.table),
        vec![
            ("Image Name".to_string(), ColumnKind::String),
            ("Dataset Name".to_string(), ColumnKind::String),
            ("Area".to_string(), ColumnKind::Double),
            ("Image".to_string(), ColumnKind::ImageRef),
        ]
    );
    let rows = (0..populated.table.row_count())
        .map(|row| populated.table.row(row).expect("row"))
        .collect::<Vec<_>>();
    assert_eq!(
        rows,
        vec![
            vec![
                TypedValue::String("img01".into()),
                TypedValue::String("ds1".into()),
                TypedValue::Double(0.5),
                TypedValue::Reference { entity: EntityKind::Image, id: 101 },
            ],
            vec![
                TypedValue::String("img02".into()),
                TypedValue::String("ds1".into()),
                TypedValue::Double(0.7),
                TypedValue::Reference { entity: EntityKind::Image, id: 102 },
            ],
        ]
    );

    let report = &populated.report;
    assert_eq!(report.rows, 2);
    assert_eq!(report.derived, vec!["Image".to_string()]);
    assert_eq!(
        report.auto_detected,
        vec![
            ("Image Name".to_string(), ColumnKind::String, ColumnSource::NameHeuristic),
            ("Dataset Name".to_string(), ColumnKind::String, ColumnSource::NameHeuristic),
            ("Area".to_string(), ColumnKind::Double, ColumnSource::Inferred),
        ]
    );
    assert!(report.unresolved.is_empty());
}

#[test]
fn repeated_runs_produce_identical_tables() {
    let hierarchy = fixture_hierarchy();
    let input = "Image Name,Roi,Area\nimg01,7,1.5\nimg02,,2\nimg01,8,2.5\n";
    let first = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    let second = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    assert_eq!(first.table, second.table);
    assert_eq!(first.linkage, second.linkage);
}

#[test]
fn screen_rows_resolve_plates_and_wells() {
    let hierarchy = fixture_hierarchy();
    let populated = populate_path(
        &fixture_path("screen_wells.csv"),
        Target::new(ContainerKind::Screen, 1),
        &hierarchy,
        &defaults(),
    )
    .unwrap();
    let table = &populated.table;
    assert_eq!(
        table.headers(),
        vec!["Plate", "Well", "Treatment", "Intensity", "Hit", "Plate Name", "Well Name"]
    );
    assert_eq!(
        table.column("Plate").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![10, 10, 11]))
    );
    assert_eq!(
        table.column("Well").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![100, 101, 110]))
    );
    assert_eq!(
        table.column("Well Name").map(|c| &c.data),
        Some(&ColumnData::strings(vec!["A1".into(), "A2".into(), "A1".into()]))
    );
    assert_eq!(
        table.column("Hit").map(|c| &c.data),
        Some(&ColumnData::Bool(vec![true, false, true]))
    );
    let intensity = table.column("Intensity").expect("intensity column");
    assert_eq!(intensity.spec.description.as_deref(), Some(r#"{"unit":"au"}"#));
    assert_eq!(intensity.spec.source, ColumnSource::ExplicitHeader);
    assert_eq!(table.column("Treatment").and_then(|c| c.size()), Some(5));
}

#[test]
fn well_names_are_case_insensitive() {
    let hierarchy = fixture_hierarchy();
    let populated =
        populate_str("Well,score\nA1,1\na1,2\nB1,3\n", "Plate:10", &hierarchy, &defaults()).unwrap();
    assert_eq!(
        populated.table.column("Well").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![100, 100, 102]))
    );
}

#[test]
fn plate_target_keeps_only_its_own_rows() {
    let hierarchy = fixture_hierarchy();
    let input = "Plate,Well,score\nplate-1,A1,1\nplate-2,A1,2\nplate-1,B1,3\n";
    let populated = populate_str(input, "Plate:10", &hierarchy, &defaults()).unwrap();
    assert_eq!(populated.report.rows, 2);
    assert_eq!(populated.report.filtered_rows, 1);
    assert_eq!(
        populated.table.column("score").map(|c| &c.data),
        Some(&ColumnData::Long(vec![1, 3]))
    );
}

#[test]
fn blank_required_reference_fails_with_row_index() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Well,score\nA1,1\n,\n,2\n", "Plate:10", &hierarchy, &defaults())
        .unwrap_err();
    assert_eq!(err.row(), Some(2));
    assert!(matches!(
        err,
        PopulateError::UnresolvedRequiredReference {
            entity: EntityKind::Well,
            cause: UnresolvedCause::Blank,
            ..
        }
    ));
}

#[test]
fn unknown_required_well_fails() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Well\nA1\nH12\n", "Plate:10", &hierarchy, &defaults()).unwrap_err();
    assert!(matches!(
        err,
        PopulateError::UnresolvedRequiredReference {
            row: 2,
            cause: UnresolvedCause::NameNotFound,
            ..
        }
    ));
}

#[test]
fn unparseable_well_name_is_a_coercion_error() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Well\n12\n", "Plate:10", &hierarchy, &defaults()).unwrap_err();
    assert!(matches!(err, PopulateError::TypeCoercion { row: 1, .. }));
}

#[test]
fn blank_optional_reference_is_left_unresolved() {
    let hierarchy = fixture_hierarchy();
    let populated =
        populate_str("Image Name,Roi\nimg01,7\nimg01,\n", "Dataset:5", &hierarchy, &defaults()).unwrap();
    let table = &populated.table;
    assert_eq!(table.headers(), vec!["Image Name", "Roi", "Image", "Roi Name"]);
    assert_eq!(
        table.column("Roi").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![7, -1]))
    );
    assert_eq!(
        table.column("Roi Name").map(|c| &c.data),
        Some(&ColumnData::strings(vec!["nucleus".into(), String::new()]))
    );
    assert_eq!(populated.report.unresolved.len(), 1);
    assert_eq!(populated.report.unresolved[0].cause, UnresolvedCause::Blank);
    assert_eq!(
        populated.linkage,
        vec![
            RoiLink { row: 0, roi: Some(7), shape: None },
            RoiLink { row: 1, roi: None, shape: None },
        ]
    );
}

#[test]
fn allow_nan_controls_empty_double_cells() {
    let hierarchy = fixture_hierarchy();
    let input = "Image Name,Area\nimg01,1.5\nimg02,\nimg01,3.2\n";

    let err = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap_err();
    assert!(matches!(
        err,
        PopulateError::TypeInference { row: 2, ref column, .. } if column == "Area"
    ));

    let options = PopulateOptions {
        allow_nan: true,
        ..defaults()
    };
    let populated = populate_str(input, "Dataset:5", &hierarchy, &options).unwrap();
    match populated.table.column("Area").map(|c| &c.data) {
        Some(ColumnData::Double(values)) => {
            assert_eq!(values[0], 1.5);
            assert!(values[1].is_nan());
            assert_eq!(values[2], 3.2);
        }
        other => panic!("expected double column, got {other:?}"),
    }
}

#[test]
fn repeated_names_are_looked_up_once() {
    let hierarchy = fixture_hierarchy();
    let mut input = String::from("Image Name,value\n");
    for i in 0..200 {
        let name = if i % 2 == 0 { "img01" } else { "img02" };
        input.push_str(&format!("{name},{i}\n"));
    }
    let populated = populate_str(&input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    assert_eq!(populated.report.rows, 200);
    // one lookup for the target plus one per distinct image name
    assert_eq!(populated.report.external_lookups, 3);
    assert_eq!(populated.report.memo_hits, 198);
    assert_eq!(hierarchy.calls(), 3);
}

#[test]
fn project_images_are_scoped_by_dataset() {
    let hierarchy = fixture_hierarchy();
    let input = "Dataset Name,Image Name,score\nds1,img01,1\nds2,img01,2\n";
    let populated = populate_str(input, "Project:3", &hierarchy, &defaults()).unwrap();
    assert_eq!(
        populated.table.headers(),
        vec!["Dataset Name", "Image Name", "score", "Image"]
    );
    assert_eq!(
        populated.table.column("Image").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![101, 103]))
    );
}

#[test]
fn project_rows_need_a_known_dataset() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Dataset Name,Image Name\nghost,img01\n", "Project:3", &hierarchy, &defaults())
        .unwrap_err();
    assert!(matches!(
        err,
        PopulateError::UnresolvedRequiredReference {
            row: 1,
            entity: EntityKind::Dataset,
            cause: UnresolvedCause::NameNotFound,
            ..
        }
    ));
}

#[test]
fn image_target_links_rois_and_shapes() {
    let hierarchy = fixture_hierarchy();
    let input = "Roi,Shape,score\n7,70,1\n7,99,2\n8,80,3\n";
    let populated = populate_str(input, "Image:101", &hierarchy, &defaults()).unwrap();
    let table = &populated.table;
    assert_eq!(table.headers(), vec!["Roi", "Shape", "score", "Roi Name"]);
    assert_eq!(
        table.column("Shape").map(|c| &c.data),
        Some(&ColumnData::Long(vec![70, -1, 80]))
    );
    assert_eq!(
        table.column("Roi Name").map(|c| &c.data),
        Some(&ColumnData::strings(vec!["nucleus".into(), "nucleus".into(), String::new()]))
    );
    assert_eq!(
        populated.linkage,
        vec![
            RoiLink { row: 0, roi: Some(7), shape: Some(70) },
            RoiLink { row: 1, roi: Some(7), shape: None },
            RoiLink { row: 2, roi: Some(8), shape: Some(80) },
        ]
    );
}

#[test]
fn each_recognized_column_gets_one_complement() {
    let hierarchy = fixture_hierarchy();
    let cases = [
        ("Image", "101", "Image Name"),
        ("Image ID", "101", "Image Name"),
        ("image_id", "101", "Image Name"),
        ("Image Name", "img01", "Image"),
        ("imagename", "img01", "Image"),
    ];
    for (header, value, complement) in cases {
        let input = format!("{header}\n{value}\n");
        let populated = populate_str(&input, "Dataset:5", &hierarchy, &defaults()).unwrap();
        assert_eq!(populated.report.derived, vec![complement.to_string()], "{header}");
    }

    let input = "Image Name,Dataset\nimg01,5\n";
    let populated = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    assert_eq!(populated.report.derived, vec!["Image", "Dataset Name"]);
    assert_eq!(
        populated.table.value(0, 3),
        Some(TypedValue::String("ds1".into()))
    );
}

#[test]
fn manual_headers_default_unknown_columns_to_strings() {
    let hierarchy = fixture_hierarchy();
    let options = PopulateOptions {
        manual_headers: true,
        ..defaults()
    };
    let populated = populate_str("Image Name,Count\nimg01,5\n", "Dataset:5", &hierarchy, &options).unwrap();
    let count = populated.table.column("Count").expect("count column");
    assert_eq!(count.kind(), ColumnKind::String);
    assert_eq!(count.spec.source, ColumnSource::Default);
}

#[test]
fn header_problems_fail_before_streaming() {
    let hierarchy = fixture_hierarchy();
    let cases: [(&str, &str); 5] = [
        ("Plate,Well,Image\np,A1,1\n", "Screen:1"),
        ("Well,x\nA1,1\n", "Screen:1"),
        ("# header s,q\nImage Name,b\nimg01,1\n", "Dataset:5"),
        ("# header s\nImage Name,b\nimg01,1\n", "Dataset:5"),
        ("Image Name,\nimg01,1\n", "Dataset:5"),
    ];
    let errors = cases
        .iter()
        .map(|(input, target)| populate_str(input, target, &hierarchy, &defaults()).unwrap_err())
        .collect::<Vec<_>>();
    assert!(matches!(errors[0], PopulateError::ConflictingColumns { .. }));
    assert!(matches!(errors[1], PopulateError::MissingRequiredColumn { .. }));
    assert!(matches!(errors[2], PopulateError::InvalidDirective { ref token } if token == "q"));
    assert!(matches!(errors[3], PopulateError::DirectiveArity { expected: 2, found: 1 }));
    assert!(matches!(errors[4], PopulateError::EmptyColumnHeader { position: 2 }));
}

#[test]
fn unknown_target_is_reported() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Image\n101\n", "Dataset:99", &hierarchy, &defaults()).unwrap_err();
    assert_eq!(err.to_string(), "cannot find Dataset:99");
}

#[test]
fn ragged_rows_are_malformed() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Image Name,Area\nimg01,1\nimg02\n", "Dataset:5", &hierarchy, &defaults())
        .unwrap_err();
    assert!(matches!(
        err,
        PopulateError::MalformedRow { row: 2, expected: 2, found: 1 }
    ));
}

#[test]
fn blank_rows_never_become_table_rows() {
    let hierarchy = fixture_hierarchy();
    let populated = populate_str(
        "Image Name,Area\n,\nimg01,1\n , \nimg02,2\n",
        "Dataset:5",
        &hierarchy,
        &defaults(),
    )
    .unwrap();
    assert_eq!(populated.report.rows, 2);
    assert_eq!(populated.report.blank_rows, 2);
}

#[test]
fn ambiguous_names_surface_hierarchy_errors() {
    let hierarchy = InMemoryHierarchy::new()
        .with_dataset(5, "ds1")
        .with_image(1, "twin", Some(5))
        .with_image(2, "twin", Some(5));
    let err = populate_str("Image Name\ntwin\n", "Dataset:5", &hierarchy, &defaults()).unwrap_err();
    assert!(matches!(err, PopulateError::Hierarchy(_)));
    assert!(err.to_string().contains("ambiguous"));
}

#[test]
fn wells_outside_plates_stay_text() {
    let hierarchy = fixture_hierarchy();
    let input = "Image Name,Well,Area\nimg01,A1,0.5\nimg02,B3,0.7\n";
    let populated = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    assert_eq!(populated.table.headers(), vec!["Image Name", "Well", "Area", "Image"]);
    assert_eq!(
        populated.table.column("Well").map(|c| &c.data),
        Some(&ColumnData::strings(vec!["A1".into(), "B3".into()]))
    );
    assert_eq!(populated.report.derived, vec!["Image".to_string()]);
    assert!(populated.report.unresolved.is_empty());
}

#[test]
fn plate_and_well_names_identify_screen_rows() {
    let hierarchy = fixture_hierarchy();
    let input = "Plate Name,Well Name,x\nplate-1,A1,1\nplate-2,a1,2\n";
    let populated = populate_str(input, "Screen:1", &hierarchy, &defaults()).unwrap();
    let table = &populated.table;
    assert_eq!(
        table.headers(),
        vec!["Plate", "Well", "x", "Plate Name", "Well Name"]
    );
    assert_eq!(
        table.column("Plate").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![10, 11]))
    );
    assert_eq!(
        table.column("Well").map(|c| &c.data),
        Some(&ColumnData::Reference(vec![100, 110]))
    );
    assert_eq!(table.value(1, 4), Some(TypedValue::String("A1".into())));
}

#[test]
fn screen_shapes_degrade_to_sentinels() {
    let hierarchy = fixture_hierarchy();
    let input = "Plate,Well,Shape\nplate-1,A1,\nplate-1,B1,70\nplate-1,A2,9999\n";
    let populated = populate_str(input, "Screen:1", &hierarchy, &defaults()).unwrap();
    assert_eq!(
        populated.table.column("Shape").map(|c| &c.data),
        Some(&ColumnData::Long(vec![-1, 70, -1]))
    );
    let causes = populated
        .report
        .unresolved
        .iter()
        .map(|u| u.cause)
        .collect::<Vec<_>>();
    assert_eq!(causes, vec![UnresolvedCause::Blank, UnresolvedCause::IdNotFound]);
}

#[test]
fn detected_tokens_populate_the_same_kinds() {
    let hierarchy = fixture_hierarchy();
    let input = "Image Name,flag,ok\nimg01,y,t\nimg02,n,f\n";
    let mut stream = RowStream::new(io_utils::open_csv_reader(input.as_bytes()), defaults().encoding);
    let tokens = detect_header_tokens(&mut stream).unwrap();
    assert_eq!(tokens, vec!["s", "b", "b"]);

    let options = PopulateOptions {
        column_types: Some(tokens),
        ..defaults()
    };
    let declared = populate_str(input, "Dataset:5", &hierarchy, &options).unwrap();
    let inferred = populate_str(input, "Dataset:5", &hierarchy, &defaults()).unwrap();
    for populated in [&declared, &inferred] {
        assert_eq!(
            populated.table.column("flag").map(|c| &c.data),
            Some(&ColumnData::Bool(vec![true, false]))
        );
        assert_eq!(
            populated.table.column("ok").map(|c| &c.data),
            Some(&ColumnData::Bool(vec![true, false]))
        );
    }
}

#[test]
fn unknown_roi_ids_fail() {
    let hierarchy = fixture_hierarchy();
    let err = populate_str("Image Name,Roi,Area\nimg01,999,0.5\n", "Dataset:5", &hierarchy, &defaults())
        .unwrap_err();
    assert!(matches!(
        err,
        PopulateError::UnknownIdentifier {
            row: 1,
            entity: EntityKind::Roi,
            id: 999,
            ..
        }
    ));
}

#[test]
fn plate_rows_and_columns_are_zero_based() {
    let hierarchy = fixture_hierarchy();
    let input = "Well,Row,Column\nA1,a,1\nB1,2,B\n";
    let populated = populate_str(input, "Plate:10", &hierarchy, &defaults()).unwrap();
    let table = &populated.table;
    assert_eq!(
        kinds(table),
        vec![
            ("Well".to_string(), ColumnKind::WellRef),
            ("Row".to_string(), ColumnKind::Long),
            ("Column".to_string(), ColumnKind::Long),
            ("Well Name".to_string(), ColumnKind::String),
        ]
    );
    assert_eq!(
        table.column("Row").map(|c| &c.data),
        Some(&ColumnData::Long(vec![0, 1]))
    );
    assert_eq!(
        table.column("Column").map(|c| &c.data),
        Some(&ColumnData::Long(vec![0, 1]))
    );
}
