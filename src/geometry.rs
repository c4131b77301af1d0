//! 卡牌定位用到的平面几何工具
//!
//! 坐标系与图像一致：x 向右，y 向下。

use serde::{Deserialize, Serialize};

/// 卡牌短边与长边之比（2.5 : 3.5）
pub const CARD_ASPECT: f64 = 2.5 / 3.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2., (self.y + other.y) / 2.)
    }
}

/// (b - a) x (c - a)
fn cross(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// 多边形有向面积（鞋带公式）
pub fn signed_area(poly: &[Point]) -> f64 {
    if poly.len() < 3 {
        return 0.;
    }
    let mut sum = 0.;
    for (i, p) in poly.iter().enumerate() {
        let q = &poly[(i + 1) % poly.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.
}

pub fn polygon_area(poly: &[Point]) -> f64 {
    signed_area(poly).abs()
}

pub fn polygon_perimeter(poly: &[Point]) -> f64 {
    poly.iter().enumerate().map(|(i, p)| p.distance(&poly[(i + 1) % poly.len()])).sum()
}

/// 求直线 p1p2 与直线 p3p4 的交点，平行时返回 None
pub fn line_intersection(p1: &Point, p2: &Point, p3: &Point, p4: &Point) -> Option<Point> {
    let d = (p1.x - p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x - p4.x);
    if d.abs() < 1e-9 {
        return None;
    }
    let a = p1.x * p2.y - p1.y * p2.x;
    let b = p3.x * p4.y - p3.y * p4.x;
    Some(Point::new(
        (a * (p3.x - p4.x) - (p1.x - p2.x) * b) / d,
        (a * (p3.y - p4.y) - (p1.y - p2.y) * b) / d,
    ))
}

/// 点是否位于凸多边形内部，`tolerance` 允许点落在边外侧的距离
pub fn point_in_convex(p: &Point, poly: &[Point], tolerance: f64) -> bool {
    let sign = signed_area(poly).signum();
    poly.iter().enumerate().all(|(i, a)| {
        let b = &poly[(i + 1) % poly.len()];
        let len = a.distance(b);
        len < 1e-9 || sign * cross(a, b, p) / len >= -tolerance
    })
}

/// 两个凸多边形的相交面积（Sutherland–Hodgman 裁剪）
pub fn convex_intersection_area(subject: &[Point], clip: &[Point]) -> f64 {
    let sign = signed_area(clip).signum();
    let mut output = subject.to_vec();
    for (i, a) in clip.iter().enumerate() {
        if output.is_empty() {
            break;
        }
        let b = &clip[(i + 1) % clip.len()];
        let inside = |p: &Point| sign * cross(a, b, p) >= 0.;
        let input = std::mem::take(&mut output);
        for (j, cur) in input.iter().enumerate() {
            let prev = &input[(j + input.len() - 1) % input.len()];
            match (inside(prev), inside(cur)) {
                (true, true) => output.push(*cur),
                (true, false) => output.extend(line_intersection(prev, cur, a, b)),
                (false, true) => {
                    output.extend(line_intersection(prev, cur, a, b));
                    output.push(*cur);
                }
                (false, false) => {}
            }
        }
    }
    polygon_area(&output)
}

/// 开放折线的 Douglas-Peucker 简化
fn douglas_peucker(points: &[Point], epsilon: f64, out: &mut Vec<Point>) {
    let (first, last) = (points[0], points[points.len() - 1]);
    let chord = first.distance(&last);
    let mut max_dist = 0.;
    let mut index = 0;
    for (i, p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let dist = match chord < 1e-9 {
            true => p.distance(&first),
            false => cross(&first, &last, p).abs() / chord,
        };
        if dist > max_dist {
            max_dist = dist;
            index = i;
        }
    }
    if max_dist > epsilon {
        douglas_peucker(&points[..=index], epsilon, out);
        out.pop();
        douglas_peucker(&points[index..], epsilon, out);
    } else {
        out.push(first);
        out.push(last);
    }
}

/// 闭合多边形的 Douglas-Peucker 简化
///
/// 以第一个点和离它最远的点把多边形切成两段分别简化。
pub fn simplify_closed(poly: &[Point], epsilon: f64) -> Vec<Point> {
    if poly.len() <= 4 {
        return poly.to_vec();
    }
    let far = (1..poly.len())
        .max_by(|&a, &b| poly[0].distance(&poly[a]).total_cmp(&poly[0].distance(&poly[b])))
        .unwrap_or(1);

    let mut out = vec![];
    douglas_peucker(&poly[..=far], epsilon, &mut out);
    out.pop();
    let mut tail = poly[far..].to_vec();
    tail.push(poly[0]);
    douglas_peucker(&tail, epsilon, &mut out);
    out.pop();
    out
}

/// 不断移除最短边（延长相邻两边求交点代替），直到只剩四个顶点
///
/// 用于把圆角卡牌的凸包近似成尖角四边形。
pub fn reduce_to_quad(poly: &[Point]) -> Option<[Point; 4]> {
    if poly.len() < 4 {
        return None;
    }
    let perimeter = polygon_perimeter(poly);
    let mut pts = poly.to_vec();
    while pts.len() > 4 {
        let n = pts.len();
        let edge = |k: usize| pts[k].distance(&pts[(k + 1) % n]);
        let k = (0..n).min_by(|&a, &b| edge(a).total_cmp(&edge(b)))?;
        let (prev, next, next2) = ((k + n - 1) % n, (k + 1) % n, (k + 2) % n);
        let mid = pts[k].midpoint(&pts[next]);
        // 相邻两边接近平行时交点会飞得很远，此时直接取中点
        let merged = line_intersection(&pts[prev], &pts[k], &pts[next], &pts[next2])
            .filter(|p| p.distance(&mid) < perimeter * 0.1)
            .unwrap_or(mid);
        pts[k] = merged;
        pts.remove(next);
    }
    Some([pts[0], pts[1], pts[2], pts[3]])
}

/// 图像中的一个四边形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// 覆盖整张图片的四边形，以像素中心为坐标
    pub fn full_frame(width: u32, height: u32) -> Self {
        let (w, h) = ((width.max(1) - 1) as f64, (height.max(1) - 1) as f64);
        Self::new([Point::new(0., 0.), Point::new(w, 0.), Point::new(w, h), Point::new(0., h)])
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self.corners.iter().fold((0., 0.), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4., sy / 4.)
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.corners.map(|p| Point::new(p.x * factor, p.y * factor)))
    }

    /// 顶点顺序无关的规范排序：从左上（x + y 最小）的点开始顺时针排列
    pub fn ordered(&self) -> Self {
        let c = self.centroid();
        let mut corners = self.corners;
        // y 轴向下，atan2 递增即屏幕上的顺时针
        let angle = |p: &Point| (p.y - c.y).atan2(p.x - c.x);
        corners.sort_by(|a, b| angle(a).total_cmp(&angle(b)));
        let start = (0..4)
            .min_by(|&i, &j| {
                let (a, b) = (&corners[i], &corners[j]);
                (a.x + a.y).total_cmp(&(b.x + b.y)).then(a.x.total_cmp(&b.x))
            })
            .unwrap_or(0);
        corners.rotate_left(start);
        Self::new(corners)
    }

    /// 用于透视校正的顶点顺序，保证输出为竖向
    ///
    /// 先按 [`Quad::ordered`] 排序；如果上下边比左右边长（横放的卡牌），
    /// 起点移到左下角，即卡牌顺时针旋转 90°。
    pub fn portrait_corners(&self) -> [Point; 4] {
        let [a, b, c, d] = self.ordered().corners;
        let horizontal = a.distance(&b) + d.distance(&c);
        let vertical = b.distance(&c) + a.distance(&d);
        if horizontal > vertical { [d, a, b, c] } else { [a, b, c, d] }
    }

    /// 短边与长边之比，边长取对边平均值
    pub fn aspect_ratio(&self) -> f64 {
        let [a, b, c, d] = self.corners;
        let horizontal = (a.distance(&b) + d.distance(&c)) / 2.;
        let vertical = (b.distance(&c) + a.distance(&d)) / 2.;
        let (short, long) =
            if horizontal < vertical { (horizontal, vertical) } else { (vertical, horizontal) };
        if long < 1e-9 { 0. } else { short / long }
    }

    pub fn is_convex(&self) -> bool {
        let signs = (0..4)
            .map(|i| {
                cross(&self.corners[i], &self.corners[(i + 1) % 4], &self.corners[(i + 2) % 4])
            })
            .collect::<Vec<_>>();
        signs.iter().all(|s| *s > 0.) || signs.iter().all(|s| *s < 0.)
    }

    /// `other` 的四个顶点是否都在本四边形内
    pub fn contains(&self, other: &Quad) -> bool {
        other.corners.iter().all(|p| point_in_convex(p, &self.corners, 1.))
    }

    pub fn intersection_area(&self, other: &Quad) -> f64 {
        convex_intersection_area(&self.corners, &other.corners)
    }

    /// 交并比
    pub fn iou(&self, other: &Quad) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0. { 0. } else { inter / union }
    }
}
