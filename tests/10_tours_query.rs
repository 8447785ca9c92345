mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

async fn seed_catalogue(app: &common::TestApp) -> Result<()> {
    for i in 0..12 {
        app.insert_tour(&format!("Easy Tour Number {:02}", i), json!({ "price": 100 + i * 100 })).await?;
    }
    app.insert_tour("The Medium Hiker", json!({ "difficulty": "medium", "price": 1497 })).await?;
    app.insert_tour("The Difficult One", json!({ "difficulty": "difficult", "price": 2997, "ratingsAverage": 4.9 }))
        .await?;
    app.insert_tour("The Secret Mountain", json!({ "secretTour": true, "price": 50 })).await?;
    Ok(())
}

fn names(body: &Value) -> Vec<String> {
    body["data"]["data"]
        .as_array()
        .map(|tours| tours.iter().filter_map(|t| t["name"].as_str()).map(str::to_string).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn paginates_filtered_results() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours?difficulty=easy&page=2&limit=5&sort=price", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["status"], "success");
    assert_eq!(res.body["results"], 5);
    let prices: Vec<i64> = res.body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["price"].as_i64().unwrap())
        .collect();
    assert_eq!(prices, vec![600, 700, 800, 900, 1000]);

    let res = app.get("/api/v1/tours?difficulty=easy&page=3&limit=5", None).await?;
    assert_eq!(res.body["results"], 2);

    let res = app.get("/api/v1/tours?difficulty=easy&page=4&limit=5", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["results"], 0);
    Ok(())
}

#[tokio::test]
async fn range_operators_and_descending_sort() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours?price[gte]=1000&price[lt]=2000&sort=-price", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let names: Vec<&str> = res.body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["The Medium Hiker", "Easy Tour Number 11", "Easy Tour Number 10", "Easy Tour Number 09"]
    );
    Ok(())
}

#[tokio::test]
async fn projects_requested_fields() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours?fields=name,price&limit=1", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    let tour = &res.body["data"]["data"][0];
    assert!(tour["id"].is_string());
    assert!(tour["name"].is_string());
    assert!(tour["price"].is_number());
    assert!(tour.get("duration").is_none(), "unexpected duration: {}", tour);
    Ok(())
}

#[tokio::test]
async fn secret_tours_stay_hidden() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;
    let secret = app.insert_tour("Another Secret Walk", json!({ "secretTour": true })).await?;

    let res = app.get("/api/v1/tours?limit=100", None).await?;
    assert_eq!(res.body["results"], 14);

    let res = app.get(&format!("/api/v1/tours/{}", secret), None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["status"], "fail");
    Ok(())
}

#[tokio::test]
async fn rejects_malformed_queries() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours?price[regex]=1", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "INVALID_QUERY_PARAMETER");

    let res = app.get("/api/v1/tours?page=0", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app.get("/api/v1/tours?limit=abc", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app.get("/api/v1/tours/not-an-id", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["message"], "Invalid id: not-an-id");
    Ok(())
}

#[tokio::test]
async fn top_five_cheap_alias() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours/top-5-cheap", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["results"], 5);
    let first = &res.body["data"]["data"][0];
    assert_eq!(first["name"], "The Difficult One");
    assert!(first.get("duration").is_none());
    assert_eq!(res.body["data"]["data"][1]["price"], 100);
    Ok(())
}

#[tokio::test]
async fn stats_group_by_difficulty() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours/tour-stats", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    let stats = res.body["data"]["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 3);
    let easy = stats.iter().find(|s| s["difficulty"] == "EASY").unwrap();
    assert_eq!(easy["numTours"], 12);
    assert_eq!(easy["minPrice"], 100);
    assert_eq!(easy["maxPrice"], 1200);
    Ok(())
}

#[tokio::test]
async fn monthly_plan_is_staff_only() -> Result<()> {
    let app = common::spawn_app().await?;
    app.insert_tour(
        "The Forest Hiker",
        json!({ "startDates": ["2021-04-25T09:00:00.000Z", "2021-07-20T09:00:00.000Z", "2022-04-05T09:00:00.000Z"] }),
    )
    .await?;
    app.insert_tour("The Sea Explorer", json!({ "startDates": ["2021-07-19T09:00:00.000Z"] })).await?;

    let res = app.get("/api/v1/tours/monthly-plan/2021", None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let (_, user) = app.user_with_role("Plain User", "user").await?;
    let res = app.get("/api/v1/tours/monthly-plan/2021", Some(&user)).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let (_, guide) = app.user_with_role("Tour Guide", "guide").await?;
    let res = app.get("/api/v1/tours/monthly-plan/2021", Some(&guide)).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let plan = res.body["data"]["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0]["month"], 7);
    assert_eq!(plan[0]["numTourStarts"], 2);
    assert_eq!(plan[1]["month"], 4);
    Ok(())
}

#[tokio::test]
async fn geo_search_and_distances() -> Result<()> {
    let app = common::spawn_app().await?;
    // Los Angeles and San Francisco
    app.insert_tour(
        "The City Wanderer",
        json!({ "startLocation": { "type": "Point", "coordinates": [-118.2437, 34.0522] } }),
    )
    .await?;
    app.insert_tour(
        "The Bay Explorer",
        json!({ "startLocation": { "type": "Point", "coordinates": [-122.4194, 37.7749] } }),
    )
    .await?;

    let res = app.get("/api/v1/tours/tours-within/100/center/34.1,-118.3/unit/mi", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["results"], 1);
    assert_eq!(res.body["data"]["data"][0]["name"], "The City Wanderer");

    let res = app.get("/api/v1/tours/distances/34.0522,-118.2437/unit/km", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    let distances = res.body["data"]["distances"].as_array().unwrap();
    assert_eq!(distances[0]["name"], "The City Wanderer");
    assert_eq!(distances[1]["name"], "The Bay Explorer");
    let km = distances[1]["distance"].as_f64().unwrap();
    assert!((km - 560.0).abs() < 25.0, "got {}", km);

    let res = app.get("/api/v1/tours/distances/nonsense/unit/km", None).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn secondary_sort_key_breaks_ties() -> Result<()> {
    let app = common::spawn_app().await?;
    app.insert_tour("The Low One", json!({ "price": 100, "ratingsAverage": 5.0 })).await?;
    app.insert_tour("Tied Middle", json!({ "price": 800, "ratingsAverage": 4.2 })).await?;
    app.insert_tour("Tied High", json!({ "price": 800, "ratingsAverage": 4.8 })).await?;
    app.insert_tour("Tied Low", json!({ "price": 800, "ratingsAverage": 3.9 })).await?;
    app.insert_tour("The Top One", json!({ "price": 900, "ratingsAverage": 4.0 })).await?;

    let res = app.get("/api/v1/tours?sort=-price,ratingsAverage", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(
        names(&res.body),
        vec!["The Top One", "Tied Low", "Tied Middle", "Tied High", "The Low One"]
    );

    let res = app.get("/api/v1/tours?sort=-price,-ratingsAverage&limit=3", None).await?;
    assert_eq!(names(&res.body), vec!["The Top One", "Tied High", "Tied Middle"]);
    Ok(())
}

#[tokio::test]
async fn best_rated_easy_tours_first_page() -> Result<()> {
    let app = common::spawn_app().await?;
    let ratings = [3.1, 4.9, 4.2, 3.8, 4.7, 4.0, 3.5, 4.4, 4.8, 3.9, 4.6, 4.1];
    for (i, rating) in ratings.iter().enumerate() {
        app.insert_tour(&format!("Easy Tour Number {:02}", i), json!({ "ratingsAverage": rating })).await?;
    }
    app.insert_tour("The Difficult One", json!({ "difficulty": "difficult", "ratingsAverage": 5.0 })).await?;

    let res = app.get("/api/v1/tours?difficulty=easy&sort=-ratingsAverage&limit=5&page=1", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["results"], 5);
    let top: Vec<f64> = res.body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["ratingsAverage"].as_f64().unwrap())
        .collect();
    assert_eq!(top, vec![4.9, 4.8, 4.7, 4.6, 4.4]);
    assert_eq!(
        names(&res.body),
        vec![
            "Easy Tour Number 01",
            "Easy Tour Number 08",
            "Easy Tour Number 04",
            "Easy Tour Number 10",
            "Easy Tour Number 07"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn comparison_operators_over_http() -> Result<()> {
    let app = common::spawn_app().await?;
    seed_catalogue(&app).await?;

    let res = app.get("/api/v1/tours?price[eq]=500", None).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(names(&res.body), vec!["Easy Tour Number 04"]);

    let res = app.get("/api/v1/tours?price[gt]=1497", None).await?;
    assert_eq!(names(&res.body), vec!["The Difficult One"]);

    let res = app.get("/api/v1/tours?price[lte]=200&sort=price", None).await?;
    assert_eq!(names(&res.body), vec!["Easy Tour Number 00", "Easy Tour Number 01"]);

    let res = app.get("/api/v1/tours?price[gt]=1000&price[lte]=1497&sort=price", None).await?;
    assert_eq!(
        names(&res.body),
        vec!["Easy Tour Number 10", "Easy Tour Number 11", "The Medium Hiker"]
    );
    Ok(())
}
