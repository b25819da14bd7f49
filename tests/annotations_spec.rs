use archmaster::db::Database;
use archmaster::models::*;
use speculate2::speculate;

fn annotated(db: &Database, name: &str, notes: &str, tags: &[&str]) -> PackageUserData {
    let data = PackageUserData {
        notes: notes.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..PackageUserData::new(name)
    };
    db.save_package_user_data(&data)
        .expect("Failed to save annotation");
    data
}

fn sorted(mut tags: Vec<String>) -> Vec<String> {
    tags.sort();
    tags
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "user data" {
        it "returns an empty record for an unannotated package" {
            let data = db.get_package_user_data("vim").expect("Query failed");
            assert_eq!(data.package_name, "vim");
            assert!(data.is_empty());
            assert!(db.find_package_user_data("vim").expect("Query failed").is_none());
        }

        it "upserts instead of duplicating" {
            annotated(&db, "vim", "editor", &["dev"]);
            annotated(&db, "vim", "editor", &["dev"]);

            let all = db.get_all_user_data().expect("Query failed");
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].notes, "editor");
        }

        it "replaces every field on save" {
            annotated(&db, "vim", "first", &["a", "b"]);
            annotated(&db, "vim", "second", &["c"]);

            let data = db.get_package_user_data("vim").expect("Query failed");
            assert_eq!(data.notes, "second");
            assert_eq!(data.tags, vec!["c"]);
        }

        it "deletes a record" {
            annotated(&db, "vim", "editor", &[]);
            assert!(db.delete_package_user_data("vim").expect("Delete failed"));
            assert!(!db.delete_package_user_data("vim").expect("Delete failed"));
            assert!(db.get_all_user_data().expect("Query failed").is_empty());
        }

        it "keeps each field independent when set one at a time" {
            db.set_package_notes("vim", "my editor").expect("Set failed");
            db.set_package_keep("vim", true).expect("Set failed");
            db.set_package_review("vim", true).expect("Set failed");
            db.set_package_review("vim", false).expect("Set failed");

            let data = db.get_package_user_data("vim").expect("Query failed");
            assert_eq!(data.notes, "my editor");
            assert!(data.marked_keep);
            assert!(!data.marked_review);
        }

        it "records when a package was viewed" {
            db.mark_viewed("vim").expect("Mark failed");
            let data = db.get_package_user_data("vim").expect("Query failed");
            assert!(data.last_viewed.is_some());
            assert!(data.notes.is_empty());
        }
    }

    describe "keep and review flags" {
        it "counts a kept package" {
            db.set_package_keep("vim", true).expect("Set failed");

            assert!(db.get_package_user_data("vim").expect("Query failed").marked_keep);
            assert!(db.is_package_marked_keep("vim").expect("Query failed"));
            assert_eq!(db.count_packages_marked_keep().expect("Count failed"), 1);
        }

        it "counts review flags and notes separately" {
            db.set_package_review("gimp", true).expect("Set failed");
            db.set_package_notes("vim", "editor").expect("Set failed");
            db.set_package_keep("bash", true).expect("Set failed");

            assert_eq!(db.count_packages_marked_review().expect("Count failed"), 1);
            assert_eq!(db.count_packages_with_notes().expect("Count failed"), 1);
            assert_eq!(db.count_packages_marked_keep().expect("Count failed"), 1);
        }
    }

    describe "tags" {
        it "adds a tag once" {
            db.add_package_tag("vim", "dev").expect("Add failed");
            db.add_package_tag("vim", "dev").expect("Add failed");
            db.add_package_tag("vim", "cli").expect("Add failed");

            assert_eq!(db.get_package_tags("vim").expect("Query failed"), vec!["dev", "cli"]);
        }

        it "removes a tag" {
            annotated(&db, "vim", "", &["dev", "cli"]);
            db.remove_package_tag("vim", "dev").expect("Remove failed");
            assert_eq!(db.get_package_tags("vim").expect("Query failed"), vec!["cli"]);
        }

        it "lists distinct tags in order" {
            annotated(&db, "vim", "", &["dev", "cli"]);
            annotated(&db, "gimp", "", &["gui", "dev"]);

            assert_eq!(db.get_all_tags().expect("Query failed"), vec!["cli", "dev", "gui"]);
        }

        it "finds packages by exact tag" {
            annotated(&db, "vim", "", &["dev"]);
            annotated(&db, "gimp", "", &["developer"]);

            assert_eq!(db.get_packages_with_tag("dev").expect("Query failed"), vec!["vim"]);
        }
    }

    describe "export and import" {
        it "round-trips every annotation" {
            annotated(&db, "vim", "editor", &["dev", "cli"]);
            annotated(&db, "gimp", "", &["gui"]);
            db.set_package_keep("vim", true).expect("Set failed");
            db.set_package_review("gimp", true).expect("Set failed");

            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("annotations.json");
            assert_eq!(db.export_to_json(&path).expect("Export failed"), 2);

            let other = Database::open_memory().expect("Failed to create database");
            other.migrate().expect("Failed to migrate");
            assert_eq!(other.import_from_json(&path).expect("Import failed"), 2);

            for original in db.get_all_user_data().expect("Query failed") {
                let copy = other
                    .get_package_user_data(&original.package_name)
                    .expect("Query failed");
                assert_eq!(copy.notes, original.notes);
                assert_eq!(sorted(copy.tags), sorted(original.tags));
                assert_eq!(copy.marked_keep, original.marked_keep);
                assert_eq!(copy.marked_review, original.marked_review);
            }
        }

        it "rejects a document that is not an array" {
            let result = db.import_from_str(r#"{"package_name": "vim"}"#);
            assert!(result.is_err());
        }

        it "rejects malformed JSON" {
            assert!(db.import_from_str("[{").is_err());
        }

        it "keeps records saved before an invalid one" {
            let raw = r#"[
                {"package_name": "vim", "notes": "editor"},
                {"notes": "no name"},
                {"package_name": "gimp"}
            ]"#;
            let err = db.import_from_str(raw).expect_err("Import should fail");
            assert!(format!("{:#}", err).contains("index 1"));

            assert_eq!(db.get_package_notes("vim").expect("Query failed"), "editor");
            assert!(db.find_package_user_data("gimp").expect("Query failed").is_none());
        }

        it "accepts records without optional fields" {
            let count = db
                .import_from_str(r#"[{"package_name": "vim", "last_viewed": ""}]"#)
                .expect("Import failed");
            assert_eq!(count, 1);
            assert!(db.find_package_user_data("vim").expect("Query failed").is_some());
        }
    }

    describe "settings" {
        it "stores and overwrites a value" {
            assert!(db.get_setting("theme").expect("Query failed").is_none());
            db.set_setting("theme", "dark").expect("Set failed");
            db.set_setting("theme", "light").expect("Set failed");
            assert_eq!(db.get_setting("theme").expect("Query failed").as_deref(), Some("light"));
        }
    }

    describe "annotate" {
        it "attaches stored data to matching packages only" {
            db.set_package_keep("vim", true).expect("Set failed");

            let packages = vec![Package::new("vim", "9.1-1"), Package::new("nano", "8.0-1")];
            let merged = db.annotate(packages).expect("Annotate failed");

            assert!(merged[0].is_marked_keep());
            assert!(merged[1].user_data.is_none());
            assert!(!merged[1].is_marked_review());
        }
    }
}
